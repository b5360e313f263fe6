use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Endpoint;
use crate::proxy::agent::ProxyAgent;

/// A proxy held in the registry: its endpoint, bound agent and last known public IP
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEntry {
    endpoint: Endpoint,
    agent: ProxyAgent,
    public_ip: Option<String>,
    checked_at: Option<DateTime<Utc>>,
}

impl ProxyEntry {
    /// Bind an agent for the endpoint and wrap both in a fresh entry
    pub fn bind(endpoint: Endpoint) -> Result<Self> {
        let agent = ProxyAgent::bind(&endpoint)?;
        Ok(Self {
            endpoint,
            agent,
            public_ip: None,
            checked_at: None,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn agent(&self) -> &ProxyAgent {
        &self.agent
    }

    /// Public IP observed through this proxy, if discovery has succeeded
    pub fn public_ip(&self) -> Option<&str> {
        self.public_ip.as_deref()
    }

    /// When the public IP was last recorded
    pub fn checked_at(&self) -> Option<DateTime<Utc>> {
        self.checked_at
    }

    pub(crate) fn set_public_ip(&mut self, ip: String) {
        self.public_ip = Some(ip);
        self.checked_at = Some(Utc::now());
    }
}
