//! Agent binding for upstream proxies
//!
//! Classifies an endpoint's scheme into the HTTP or SOCKS family and binds the
//! tunnelling capability used to route requests through it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::debug;
use url::Url;

use crate::error::{Result, RotaError};
use crate::models::{wrap_host, Endpoint};

/// Proxy family an agent speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    /// `http`, `https` and anything else starting with `http`
    Http,
    /// `socks4`, `socks4a`, `socks5`, `socks5h`, ...
    Socks,
}

impl AgentKind {
    /// Classify a scheme by case-insensitive prefix
    pub fn classify(scheme: &str) -> Option<Self> {
        let scheme = scheme.to_lowercase();
        if scheme.starts_with("http") {
            Some(AgentKind::Http)
        } else if scheme.starts_with("socks") {
            Some(AgentKind::Socks)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Http => "http",
            AgentKind::Socks => "socks",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tunnelling capability bound to one proxy endpoint
///
/// Agents are cheap to clone and hold no open connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAgent {
    kind: AgentKind,
    endpoint: Endpoint,
    url: Url,
}

impl ProxyAgent {
    /// Bind an agent for the endpoint's scheme
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let kind = AgentKind::classify(endpoint.scheme())
            .ok_or_else(|| RotaError::UnsupportedProtocol(endpoint.scheme().to_string()))?;

        let url = endpoint.to_url()?;

        Ok(Self {
            kind,
            endpoint: endpoint.clone(),
            url,
        })
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Proxy URL including credentials, suitable for HTTP client proxy settings
    pub fn proxy_url(&self) -> &Url {
        &self.url
    }

    /// Open a TCP stream to `target_host:target_port` through this proxy
    pub async fn connect(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let proxy_addr = self.endpoint.address();
        let target = format_authority(target_host, target_port);

        let result = match self.kind {
            AgentKind::Http => {
                connect_via_http_proxy(&self.endpoint, &proxy_addr, target_host, target_port).await
            }
            AgentKind::Socks => {
                connect_via_socks_proxy(&self.endpoint, &proxy_addr, target_host, target_port)
                    .await
            }
        };

        result.map_err(|e| {
            RotaError::Transport(format!(
                "{} proxy connect failed ({} -> {}): {}",
                self.endpoint.scheme(),
                proxy_addr,
                target,
                e
            ))
        })
    }
}

async fn connect_via_http_proxy(
    proxy: &Endpoint,
    proxy_addr: &str,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let mut stream = TcpStream::connect(proxy_addr).await?;

    let request = build_connect_request(proxy, target_host, target_port);
    stream.write_all(request.as_bytes()).await?;

    let mut response = vec![0u8; 1024];
    let n = stream.read(&mut response).await?;
    if n == 0 {
        anyhow::bail!("empty CONNECT response");
    }

    let response_str = String::from_utf8_lossy(&response[..n]);
    if !response_str.starts_with("HTTP/1.1 200") && !response_str.starts_with("HTTP/1.0 200") {
        anyhow::bail!(
            "CONNECT failed: {}",
            response_str.lines().next().unwrap_or("Unknown error")
        );
    }

    debug!("HTTP CONNECT tunnel established via {}", proxy_addr);
    Ok(stream)
}

async fn connect_via_socks_proxy(
    proxy: &Endpoint,
    proxy_addr: &str,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let socket = TcpStream::connect(proxy_addr).await?;
    let target = (target_host, target_port);

    let stream = if proxy.scheme().starts_with("socks4") {
        // SOCKS4 has no password, only a user id.
        match proxy.username() {
            Some(user) => {
                Socks4Stream::connect_with_userid_and_socket(socket, target, user)
                    .await?
                    .into_inner()
            }
            None => Socks4Stream::connect_with_socket(socket, target)
                .await?
                .into_inner(),
        }
    } else {
        match (proxy.username(), proxy.password()) {
            (Some(user), Some(pass)) => {
                Socks5Stream::connect_with_password_and_socket(socket, target, user, pass)
                    .await?
                    .into_inner()
            }
            _ => Socks5Stream::connect_with_socket(socket, target)
                .await?
                .into_inner(),
        }
    };

    debug!("SOCKS tunnel established via {}", proxy_addr);
    Ok(stream)
}

/// Build an HTTP CONNECT request, with Basic proxy auth when credentials are set
fn build_connect_request(proxy: &Endpoint, target_host: &str, target_port: u16) -> String {
    let authority = format_authority(target_host, target_port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let (Some(username), Some(password)) = (proxy.username(), proxy.password()) {
        let credentials = format!("{}:{}", username, password);
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials.as_bytes())
        ));
    }

    request.push_str("\r\n");
    request
}

fn format_authority(host: &str, port: u16) -> String {
    format!("{}:{}", wrap_host(host), port)
}
