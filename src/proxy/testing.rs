//! In-memory transport for exercising rotation logic without a network

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;

use crate::config::DEFAULT_IP_ECHO_URL;
use crate::error::{Result, RotaError};
use crate::proxy::transport::{RequestOptions, RequestTransport, TransportResponse};

#[derive(Debug, Clone)]
enum Behaviour {
    Healthy,
    Status(u16, String),
}

/// Answers per proxy host: healthy hosts return 200 (and an IP from the echo URL),
/// scripted hosts return a fixed status, everything else is a transport failure.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    behaviours: HashMap<String, Behaviour>,
    failing_urls: HashSet<String>,
    remaining_failures: Arc<Mutex<HashMap<String, u32>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn healthy(mut self, host: &str) -> Self {
        self.behaviours.insert(host.to_string(), Behaviour::Healthy);
        self
    }

    pub fn status_for(mut self, host: &str, status: u16, body: &str) -> Self {
        self.behaviours
            .insert(host.to_string(), Behaviour::Status(status, body.to_string()));
        self
    }

    /// Fail the first `n` requests routed through `host`
    pub fn failing_first(self, host: &str, n: u32) -> Self {
        self.remaining_failures.lock().insert(host.to_string(), n);
        self
    }

    /// Fail every request for `url`, whatever the proxy
    pub fn failing_url(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    /// Shared log of `(url, proxy host)` pairs, in call order
    pub fn calls(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        self.calls.clone()
    }

    pub fn ip_of(host: &str) -> String {
        format!("198.51.100.{}", host.len())
    }
}

#[async_trait]
impl RequestTransport for ScriptedTransport {
    async fn send(&self, url: &str, options: RequestOptions) -> Result<TransportResponse> {
        let host = options
            .agent
            .as_ref()
            .map(|a| a.endpoint().host().to_string())
            .unwrap_or_default();
        self.calls.lock().push((url.to_string(), host.clone()));

        if self.failing_urls.contains(url) {
            return Err(RotaError::Transport(format!("{} is unreachable", url)));
        }

        if let Some(remaining) = self.remaining_failures.lock().get_mut(&host) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RotaError::Transport(format!("{} reset the connection", host)));
            }
        }

        match self.behaviours.get(&host) {
            Some(Behaviour::Healthy) if url == DEFAULT_IP_ECHO_URL => Ok(TransportResponse::new(
                StatusCode::OK,
                format!(r#"{{"ip":"{}"}}"#, Self::ip_of(&host)),
            )),
            Some(Behaviour::Healthy) => Ok(TransportResponse::new(StatusCode::OK, "ok")),
            Some(Behaviour::Status(status, body)) => Ok(TransportResponse::new(
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                body.clone(),
            )),
            None => Err(RotaError::Transport(format!(
                "connection to '{}' refused",
                host
            ))),
        }
    }
}
