use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Result, RotaError};

/// Characters escaped in the userinfo part of a proxy URL, `%` included so
/// credentials survive a decode unchanged
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Canonical descriptor of one upstream proxy
///
/// Constructed only through [`Endpoint::new`] (or the parser), which enforces that
/// scheme and host are non-empty, the host is a valid domain or IP address, the port
/// is non-zero and credentials come in pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing)]
    password: Option<String>,
}

impl Endpoint {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        credentials: Option<(String, String)>,
    ) -> Result<Self> {
        let scheme = scheme.into().to_lowercase();
        let host = host.into();

        if scheme.is_empty() {
            return Err(RotaError::InvalidProxyAddress("missing scheme".into()));
        }
        if host.is_empty() {
            return Err(RotaError::InvalidProxyAddress("missing host".into()));
        }
        Host::parse(&wrap_host(&host)).map_err(|e| {
            RotaError::InvalidProxyAddress(format!("invalid host '{}': {}", host, e))
        })?;
        if port == 0 {
            return Err(RotaError::InvalidProxyAddress(format!(
                "port 0 is not valid for {}",
                host
            )));
        }

        let (username, password) = match credentials {
            Some((user, pass)) => (Some(user), Some(pass)),
            None => (None, None),
        };

        Ok(Self {
            scheme,
            host,
            port,
            username,
            password,
        })
    }

    /// Lowercased scheme without the `://` separator
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host as written, without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }

    /// `host:port` with IPv6 hosts bracketed; safe to log
    pub fn address(&self) -> String {
        format!("{}:{}", wrap_host(&self.host), self.port)
    }

    /// Proxy URL with credentials percent-encoded into the userinfo
    pub fn to_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}://{}", self.scheme, self.address()))?;

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            let rejected = || {
                RotaError::InvalidProxyAddress(format!(
                    "{} cannot carry credentials",
                    self.address()
                ))
            };
            url.set_username(&encode_userinfo(user))
                .map_err(|_| rejected())?;
            url.set_password(Some(&encode_userinfo(pass)))
                .map_err(|_| rejected())?;
        }

        Ok(url)
    }
}

fn encode_userinfo(value: &str) -> String {
    utf8_percent_encode(value, USERINFO).to_string()
}

/// Render the full proxy URL, credentials included
impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => write!(
                f,
                "{}://{}:{}@{}",
                self.scheme,
                encode_userinfo(user),
                encode_userinfo(pass),
                self.address()
            ),
            _ => write!(f, "{}://{}", self.scheme, self.address()),
        }
    }
}

/// Wrap a host in brackets when it is a literal IPv6 address
pub fn wrap_host(host: &str) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Partially structured proxy description, e.g. loaded from JSON
///
/// A missing scheme is filled from the configured default when parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialEndpoint {
    #[serde(default, alias = "protocol")]
    pub scheme: Option<String>,
    #[serde(alias = "hostname")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// Anything [`crate::proxy::parser::parse`] accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySpec {
    Text(String),
    Structured(PartialEndpoint),
}

impl From<&str> for ProxySpec {
    fn from(s: &str) -> Self {
        ProxySpec::Text(s.to_string())
    }
}

impl From<String> for ProxySpec {
    fn from(s: String) -> Self {
        ProxySpec::Text(s)
    }
}

impl From<&String> for ProxySpec {
    fn from(s: &String) -> Self {
        ProxySpec::Text(s.clone())
    }
}

impl From<PartialEndpoint> for ProxySpec {
    fn from(p: PartialEndpoint) -> Self {
        ProxySpec::Structured(p)
    }
}

impl From<Endpoint> for ProxySpec {
    fn from(e: Endpoint) -> Self {
        ProxySpec::Structured(PartialEndpoint {
            scheme: Some(e.scheme),
            host: e.host,
            port: e.port,
            username: e.username,
            password: e.password,
        })
    }
}

impl std::fmt::Display for ProxySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxySpec::Text(s) => write!(f, "{}", s),
            ProxySpec::Structured(p) => write!(f, "{}:{}", wrap_host(&p.host), p.port),
        }
    }
}
