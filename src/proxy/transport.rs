//! Request transport layer
//!
//! The rotator never performs network I/O itself: every request goes through a
//! [`RequestTransport`], which receives the target URL and an options bag carrying
//! the current proxy agent.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::HOST;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, RotaError};
use crate::models::wrap_host;
use crate::proxy::agent::ProxyAgent;

/// Options bag handed to the transport with every request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Proxy to route through; `None` means a direct request
    pub agent: Option<ProxyAgent>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            agent: None,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent: Option<ProxyAgent>) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Performs the actual network call for the rotator
///
/// Implementations must resolve with a response for any HTTP status and reserve
/// `Err` for failures to obtain one; only errors count toward rotation on failure.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn send(&self, url: &str, options: RequestOptions) -> Result<TransportResponse>;

    /// Drop per-proxy state kept for agents not in `active`
    ///
    /// Called whenever the proxy pool is replaced.
    fn prune(&self, _active: &[ProxyAgent]) {}
}

/// Adapts an async closure into a transport
pub struct FnTransport<F> {
    f: F,
}

impl<F> FnTransport<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RequestTransport for FnTransport<F>
where
    F: Fn(String, RequestOptions) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransportResponse>> + Send,
{
    async fn send(&self, url: &str, options: RequestOptions) -> Result<TransportResponse> {
        (self.f)(url.to_string(), options).await
    }
}

/// Default transport backed by `reqwest`
///
/// Keeps one client per proxy URL so connection pools are not shared across proxies.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: DashMap<String, reqwest::Client>,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            timeout: Some(timeout),
        }
    }

    fn client_for(&self, agent: Option<&ProxyAgent>) -> Result<reqwest::Client> {
        let key = agent
            .map(|a| a.proxy_url().to_string())
            .unwrap_or_default();

        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match agent {
            Some(agent) => builder.proxy(reqwest::Proxy::all(agent.proxy_url().as_str())?),
            None => builder.no_proxy(),
        };

        let client = builder.build()?;
        debug!(
            "Created HTTP client for {}",
            agent
                .map(|a| a.endpoint().address())
                .unwrap_or_else(|| "direct".to_string())
        );
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RequestTransport for ReqwestTransport {
    fn prune(&self, active: &[ProxyAgent]) {
        let keep: HashSet<String> = active.iter().map(|a| a.proxy_url().to_string()).collect();
        let before = self.clients.len();
        // The empty key is the direct client, shared by every pool.
        self.clients
            .retain(|key, _| key.is_empty() || keep.contains(key));
        debug!(
            "Evicted {} cached HTTP clients",
            before.saturating_sub(self.clients.len())
        );
    }

    async fn send(&self, url: &str, options: RequestOptions) -> Result<TransportResponse> {
        let client = self.client_for(options.agent.as_ref())?;

        let response = client
            .request(options.method, url)
            .headers(options.headers)
            .body(options.body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Plain HTTP/1.1 over a tunnel opened by the agent itself
///
/// Useful where pulling in a full client is unwanted. TLS is not spoken, so only
/// `http://` targets are supported.
#[derive(Debug, Clone, Default)]
pub struct TunnelTransport {
    timeout: Option<Duration>,
}

impl TunnelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    async fn exchange(&self, url: &Url, options: RequestOptions) -> Result<TransportResponse> {
        let (host, port) = target_of(url)?;

        let stream = match &options.agent {
            Some(agent) => agent.connect(&host, port).await?,
            None => TcpStream::connect(format!("{}:{}", wrap_host(&host), port)).await?,
        };

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Tunnel connection closed with error: {}", e);
            }
        });

        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let mut request = Request::builder()
            .method(options.method)
            .uri(path)
            .body(Full::new(options.body))?;
        *request.headers_mut() = options.headers;
        if !request.headers().contains_key(HOST) {
            let authority = match url.port() {
                Some(p) => format!("{}:{}", wrap_host(&host), p),
                None => wrap_host(&host),
            };
            let value = HeaderValue::from_str(&authority)
                .map_err(|e| RotaError::Transport(format!("invalid Host header: {}", e)))?;
            request.headers_mut().insert(HOST, value);
        }

        let response = sender.send_request(request).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(TransportResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[async_trait]
impl RequestTransport for TunnelTransport {
    #[instrument(skip(self, options), fields(method = %options.method))]
    async fn send(&self, url: &str, options: RequestOptions) -> Result<TransportResponse> {
        let url = Url::parse(url)
            .map_err(|e| RotaError::Transport(format!("invalid target '{}': {}", url, e)))?;

        if url.scheme() != "http" {
            return Err(RotaError::Transport(format!(
                "tunnel transport cannot reach {} targets",
                url.scheme()
            )));
        }

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(&url, options))
                .await
                .map_err(|_| RotaError::Transport("request timed out".to_string()))?,
            None => self.exchange(&url, options).await,
        }
    }
}

fn target_of(url: &Url) -> Result<(String, u16)> {
    let host = url
        .host_str()
        .ok_or_else(|| RotaError::Transport(format!("'{}' has no host", url)))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = url
        .port_or_known_default()
        .ok_or_else(|| RotaError::Transport(format!("'{}' has no port", url)))?;
    Ok((host.to_string(), port))
}
