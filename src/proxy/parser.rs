//! Proxy spec parsing
//!
//! Accepts three shapes of input:
//! - full URLs: `scheme://[user:pass@]host:port`
//! - bare `host:port`, prefixed with the default scheme
//! - the compact form `scheme://host:port[:user:pass]`, where an IPv6 host may be
//!   written with or without brackets
//!
//! The compact grammar is tried first and generic URL parsing is the fallback, so
//! strings with paths or query strings still resolve to an endpoint.

use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use crate::error::{Result, RotaError};
use crate::models::{Endpoint, PartialEndpoint, ProxySpec};

pub use crate::models::wrap_host;

/// Parse any accepted proxy spec into a canonical endpoint
pub fn parse(spec: impl Into<ProxySpec>, default_scheme: &str) -> Result<Endpoint> {
    match spec.into() {
        ProxySpec::Text(text) => parse_str(&text, default_scheme),
        ProxySpec::Structured(partial) => normalize(partial, default_scheme),
    }
}

/// Parse a textual proxy spec
pub fn parse_str(input: &str, default_scheme: &str) -> Result<Endpoint> {
    let input = input.trim();

    if has_scheme(input) {
        return parse_with_scheme(input);
    }

    // Retry exactly once with the default scheme in front.
    let prefixed = format!("{}://{}", strip_separator(default_scheme), input);
    if !has_scheme(&prefixed) {
        return Err(RotaError::InvalidProxyAddress(format!(
            "'{}' has no scheme and default scheme '{}' is not usable",
            input, default_scheme
        )));
    }
    parse_with_scheme(&prefixed)
}

fn parse_with_scheme(input: &str) -> Result<Endpoint> {
    parse_compact(input).or_else(|compact_err| {
        debug!("Compact grammar rejected proxy spec ({}), trying URL parsing", compact_err);
        parse_url(input)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InBracket,
}

/// Parse the compact `scheme://host:port[:user:pass]` grammar
///
/// A bare `@` outside brackets is rejected: credentials belong in the trailing
/// `:user:pass` fields here, and `user:pass@host` strings go through URL parsing.
/// An unterminated `[` swallows the rest of the input into the host field.
pub fn parse_compact(input: &str) -> Result<Endpoint> {
    let fields = scan_fields(input)?;

    if fields.len() != 3 && fields.len() != 5 {
        return Err(RotaError::InvalidProxyAddress(format!(
            "'{}' has {} fields, expected 3 or 5",
            input,
            fields.len()
        )));
    }

    let scheme = fields[0].strip_suffix("://").ok_or_else(|| {
        RotaError::InvalidProxyAddress(format!("'{}' is missing the :// separator", input))
    })?;

    let port = parse_port(&fields[2], input)?;

    let credentials = if fields.len() == 5 {
        Some((fields[3].clone(), fields[4].clone()))
    } else {
        None
    };

    Endpoint::new(scheme, fields[1].as_str(), port, credentials)
}

fn scan_fields(input: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = input.chars().collect();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut state = ScanState::Normal;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match (state, c) {
            (ScanState::Normal, '@') => {
                return Err(RotaError::InvalidProxyAddress(format!(
                    "unexpected '@' at position {} in '{}'",
                    i, input
                )));
            }
            (ScanState::Normal, '[') if field.is_empty() => {
                state = ScanState::InBracket;
            }
            (ScanState::InBracket, ']') if matches!(chars.get(i + 1), None | Some(':')) => {
                state = ScanState::Normal;
            }
            (ScanState::Normal, ':') => {
                if chars.get(i + 1) == Some(&'/') && chars.get(i + 2) == Some(&'/') {
                    field.push_str("://");
                    i += 2;
                }
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
        i += 1;
    }

    fields.push(field);
    Ok(fields)
}

/// Generic URL parsing, the last resort for strings the compact grammar rejects
fn parse_url(input: &str) -> Result<Endpoint> {
    let url = Url::parse(input)?;

    let host = url
        .host_str()
        .ok_or_else(|| RotaError::InvalidProxyAddress(format!("'{}' has no host", input)))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    let port = url
        .port_or_known_default()
        .ok_or_else(|| RotaError::InvalidProxyAddress(format!("'{}' has no port", input)))?;

    let credentials = match (url.username(), url.password()) {
        ("", None) => None,
        (user, pass) => Some((decode_userinfo(user)?, decode_userinfo(pass.unwrap_or(""))?)),
    };

    Endpoint::new(url.scheme(), host, port, credentials)
}

fn decode_userinfo(value: &str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| RotaError::InvalidProxyAddress(format!("credentials are not UTF-8: {}", e)))
}

/// Fill in the scheme of a structured spec and validate it
fn normalize(partial: PartialEndpoint, default_scheme: &str) -> Result<Endpoint> {
    let scheme = match partial.scheme.as_deref().map(strip_separator) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => strip_separator(default_scheme).to_string(),
    };

    let host = partial
        .host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&partial.host);

    let credentials = match (partial.username, partial.password) {
        (None, None) => None,
        (user, pass) => Some((user.unwrap_or_default(), pass.unwrap_or_default())),
    };

    Endpoint::new(scheme, host, partial.port, credentials)
}

fn parse_port(field: &str, input: &str) -> Result<u16> {
    match field.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(RotaError::InvalidProxyAddress(format!(
            "invalid port '{}' in '{}'",
            field, input
        ))),
    }
}

/// `^\w+://`
fn has_scheme(input: &str) -> bool {
    match input.find("://") {
        Some(0) | None => false,
        Some(idx) => input[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
    }
}

/// Accept `http`, `http:` and `http://` alike
fn strip_separator(scheme: &str) -> &str {
    scheme.trim_end_matches('/').trim_end_matches(':')
}
