//! Health checking for upstream proxies
//!
//! Liveness probes and public IP discovery, both retried up to the configured
//! number of attempts through a given proxy agent.

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::RotatorConfig;
use crate::error::{Result, RotaError};
use crate::proxy::agent::ProxyAgent;
use crate::proxy::transport::{RequestOptions, TransportResponse};

#[derive(Debug, Deserialize)]
struct IpEcho {
    ip: String,
}

/// Health checker bound to one configuration snapshot
pub struct HealthChecker<'a> {
    config: &'a RotatorConfig,
}

impl<'a> HealthChecker<'a> {
    pub fn new(config: &'a RotatorConfig) -> Self {
        Self { config }
    }

    /// Check that `agent` can reach the configured check URL
    ///
    /// Vacuously true when checks are disabled. Every failed attempt is reported
    /// to the error hook; running out of attempts yields false, never an error.
    #[instrument(skip(self, agent), fields(proxy = %describe(agent)))]
    pub async fn probe(&self, agent: Option<&ProxyAgent>) -> bool {
        if !self.config.check_enabled {
            return true;
        }

        for attempt in 1..=self.config.check_threshold {
            match self.request(&self.config.check_url, agent).await {
                Ok(response) if response.is_success() => {
                    debug!("Probe succeeded on attempt {}", attempt);
                    return true;
                }
                Ok(response) => {
                    warn!("Probe attempt {} got status {}", attempt, response.status);
                    self.config.report(&unexpected_status(&response));
                }
                Err(e) => {
                    warn!("Probe attempt {} failed: {}", attempt, e);
                    self.config.report(&e);
                }
            }
        }

        false
    }

    /// Ask the IP echo service which address the proxy presents
    ///
    /// On exhaustion, fails with the last error seen, or with
    /// [`RotaError::ProbeExhausted`] when no attempt produced one.
    #[instrument(skip(self, agent), fields(proxy = %describe(agent)))]
    pub async fn discover_public_ip(&self, agent: Option<&ProxyAgent>) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=self.config.check_threshold {
            let err = match self.request(&self.config.ip_echo_url, agent).await {
                Ok(response) if response.is_success() => match response.json::<IpEcho>() {
                    Ok(echo) => {
                        debug!("Public IP is {}", echo.ip);
                        return Ok(echo.ip);
                    }
                    Err(e) => e,
                },
                Ok(response) => unexpected_status(&response),
                Err(e) => e,
            };

            warn!("IP discovery attempt {} failed: {}", attempt, err);
            self.config.report(&err);
            last_error = Some(err);
        }

        Err(last_error.unwrap_or(RotaError::ProbeExhausted {
            attempts: self.config.check_threshold,
        }))
    }

    async fn request(&self, url: &str, agent: Option<&ProxyAgent>) -> Result<TransportResponse> {
        let options = RequestOptions::default().with_agent(agent.cloned());
        self.config.transport.send(url, options).await
    }
}

fn unexpected_status(response: &TransportResponse) -> RotaError {
    RotaError::UnexpectedStatus {
        status: response.status.as_u16(),
        body: response.text(),
    }
}

fn describe(agent: Option<&ProxyAgent>) -> String {
    agent
        .map(|a| a.endpoint().address())
        .unwrap_or_else(|| "direct".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Endpoint;
    use crate::proxy::testing::ScriptedTransport;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn agent(host: &str) -> ProxyAgent {
        ProxyAgent::bind(&Endpoint::new("http", host, 8080, None).unwrap()).unwrap()
    }

    fn config_with(transport: ScriptedTransport) -> (RotatorConfig, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let config = RotatorConfig::default()
            .with_transport(transport)
            .on_error(move |e| sink.lock().push(e.to_string()));
        (config, errors)
    }

    #[tokio::test]
    async fn test_probe_disabled_makes_no_request() {
        let transport = ScriptedTransport::new();
        let calls = transport.calls();
        let (mut config, _) = config_with(transport);
        config.check_enabled = false;

        assert!(HealthChecker::new(&config).probe(Some(&agent("dead"))).await);
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_probe_healthy_proxy() {
        let transport = ScriptedTransport::new().healthy("good");
        let calls = transport.calls();
        let (config, errors) = config_with(transport);

        assert!(HealthChecker::new(&config).probe(Some(&agent("good"))).await);
        assert_eq!(calls.lock().len(), 1);
        assert!(errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_probe_exhausts_attempts_and_reports_each_failure() {
        let transport = ScriptedTransport::new();
        let calls = transport.calls();
        let (config, errors) = config_with(transport);

        assert!(!HealthChecker::new(&config).probe(Some(&agent("dead"))).await);
        assert_eq!(calls.lock().len(), 3);
        assert_eq!(errors.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_probe_recovers_after_flaky_attempt() {
        let transport = ScriptedTransport::new().healthy("flaky").failing_first("flaky", 1);
        let calls = transport.calls();
        let (config, errors) = config_with(transport);

        assert!(HealthChecker::new(&config).probe(Some(&agent("flaky"))).await);
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_reports_non_success_status() {
        let transport = ScriptedTransport::new().status_for("blocked", 403, "forbidden");
        let (config, errors) = config_with(transport);

        assert!(!HealthChecker::new(&config).probe(Some(&agent("blocked"))).await);
        let errors = errors.lock();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("403"));
        assert!(errors[0].contains("forbidden"));
    }

    #[tokio::test]
    async fn test_discover_public_ip() {
        let transport = ScriptedTransport::new().healthy("good");
        let (config, _) = config_with(transport);

        let ip = HealthChecker::new(&config)
            .discover_public_ip(Some(&agent("good")))
            .await
            .unwrap();
        assert_eq!(ip, ScriptedTransport::ip_of("good"));
    }

    #[tokio::test]
    async fn test_discover_public_ip_returns_last_error() {
        let transport = ScriptedTransport::new().status_for("blocked", 429, "slow down");
        let (config, errors) = config_with(transport);

        let err = HealthChecker::new(&config)
            .discover_public_ip(Some(&agent("blocked")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RotaError::UnexpectedStatus { status: 429, ref body } if body == "slow down"
        ));
        assert_eq!(errors.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_discover_public_ip_transport_failure() {
        let (config, _) = config_with(ScriptedTransport::new());

        let err = HealthChecker::new(&config)
            .discover_public_ip(Some(&agent("dead")))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_discover_public_ip_without_attempts_uses_fallback() {
        let (mut config, _) = config_with(ScriptedTransport::new().healthy("good"));
        config.check_threshold = 0;

        let err = HealthChecker::new(&config)
            .discover_public_ip(Some(&agent("good")))
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::ProbeExhausted { attempts: 0 }));
    }

    #[tokio::test]
    async fn test_discover_public_ip_rejects_malformed_json() {
        let transport = ScriptedTransport::new().status_for("odd", 200, "not json");
        let (config, _) = config_with(transport);

        let err = HealthChecker::new(&config)
            .discover_public_ip(Some(&agent("odd")))
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::Json(_)));
    }
}
