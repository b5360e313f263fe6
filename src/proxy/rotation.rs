//! Proxy rotation
//!
//! [`Rotator`] owns one proxy pool: the registry, the success/failure counters and
//! the configuration. Requests go out through the current proxy and their outcome
//! is tallied; crossing a threshold rotates to the next proxy that passes a probe.
//!
//! ## Concurrency
//!
//! A rotator is meant to be shared behind an `Arc`. Rotations are serialized, and
//! each counter update is atomic with its threshold check. A request captures the
//! current agent when it starts, so a rotation committed while it is in flight
//! does not reroute it. Requests finishing together may each see the threshold
//! crossed and queue one rotation apiece.

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{proxies_from_env, RotatorConfig};
use crate::error::{Result, RotaError};
use crate::models::{Endpoint, ProxyEntry, ProxySpec};
use crate::proxy::agent::ProxyAgent;
use crate::proxy::counter::{RequestCounter, RequestCounts};
use crate::proxy::health::HealthChecker;
use crate::proxy::parser;
use crate::proxy::registry::ProxyRegistry;
use crate::proxy::transport::{RequestOptions, TransportResponse};

/// A rotating proxy pool behind a single request interface
pub struct Rotator {
    config: RwLock<RotatorConfig>,
    registry: RwLock<ProxyRegistry>,
    counter: RequestCounter,
    rotation: Mutex<()>,
}

impl Default for Rotator {
    fn default() -> Self {
        Self::new(RotatorConfig::default())
    }
}

impl Rotator {
    pub fn new(config: RotatorConfig) -> Self {
        Self {
            config: RwLock::new(config),
            registry: RwLock::new(ProxyRegistry::new()),
            counter: RequestCounter::new(),
            rotation: Mutex::new(()),
        }
    }

    /// Build a rotator from `ROTA_*` environment variables and load `ROTA_PROXIES`
    pub fn from_env() -> Result<Self> {
        let rotator = Self::new(RotatorConfig::from_env()?);
        rotator.setup(proxies_from_env());
        Ok(rotator)
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> RotatorConfig {
        self.config.read().clone()
    }

    /// Change the configuration; takes effect from the next operation
    pub fn configure(&self, f: impl FnOnce(&mut RotatorConfig)) {
        f(&mut self.config.write());
    }

    /// Parse a proxy spec using the configured default scheme
    pub fn parse(&self, spec: impl Into<ProxySpec>) -> Result<Endpoint> {
        let default_scheme = self.config.read().default_scheme.clone();
        parser::parse(spec, &default_scheme)
    }

    /// Replace the registry with the given specs and point the cursor at the first
    ///
    /// Invalid specs are reported to the error hook and skipped. A rotation running
    /// at the time gives up instead of committing into the new registry.
    pub fn setup<I, S>(&self, specs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<ProxySpec>,
    {
        let config = self.config();
        let registry = ProxyRegistry::build(specs, &config.default_scheme, &|e: &RotaError| {
            config.report(e)
        });
        let agents: Vec<ProxyAgent> = registry
            .entries()
            .iter()
            .map(|entry| entry.agent().clone())
            .collect();

        self.registry.write().replace(registry);
        config.transport.prune(&agents);
    }

    /// Entry under the cursor, or `None` when no proxy is available
    pub fn current(&self) -> Option<ProxyEntry> {
        self.registry.read().current().cloned()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// All registry entries in order
    pub fn entries(&self) -> Vec<ProxyEntry> {
        self.registry.read().entries().to_vec()
    }

    /// Successes and failures counted since the last rotation
    pub fn counts(&self) -> RequestCounts {
        self.counter.snapshot()
    }

    /// Attach the current proxy's agent to a request's options
    pub fn wrap_options(&self, options: RequestOptions) -> RequestOptions {
        let agent = self.current().map(|entry| entry.agent().clone());
        options.with_agent(agent)
    }

    /// Send a request through the current proxy, rotating when a threshold is crossed
    ///
    /// A rotation triggered here completes before the result is returned, and a
    /// failure is returned to the caller after the rotation it caused. The request's
    /// own outcome is returned even when that rotation fails.
    pub async fn fetch(&self, url: &str, options: RequestOptions) -> Result<TransportResponse> {
        let config = self.config();
        let options = self.wrap_options(options);

        match config.transport.send(url, options).await {
            Ok(response) => {
                if self.counter.record_success(config.rotate_threshold) {
                    debug!("Success threshold {} reached", config.rotate_threshold);
                    self.rotate_after_request().await;
                }
                Ok(response)
            }
            Err(e) => {
                debug!("Request to {} failed: {}", url, e);
                if self.counter.record_failure(config.fail_threshold) {
                    debug!("Failure threshold {} reached", config.fail_threshold);
                    self.rotate_after_request().await;
                }
                Err(e)
            }
        }
    }

    /// Probe the current proxy
    pub async fn probe(&self) -> bool {
        let config = self.config();
        let current = self.current();
        HealthChecker::new(&config)
            .probe(current.as_ref().map(|e| e.agent()))
            .await
    }

    /// Public IP seen through the current proxy
    pub async fn discover_public_ip(&self) -> Result<String> {
        let config = self.config();
        let current = self.current();
        HealthChecker::new(&config)
            .discover_public_ip(current.as_ref().map(|e| e.agent()))
            .await
    }

    async fn rotate_after_request(&self) {
        if let Err(e) = self.rotate().await {
            warn!("Rotation stopped: {}", e);
        }
    }

    /// Move to the next proxy that passes a probe
    ///
    /// Counters are reset first, whatever the outcome. At most `len - 1` candidates
    /// are tried, never the starting one again. Returns the committed entry, or
    /// `None` when no candidate passed; the cursor then stays on the last one tried
    /// and the rotate hook does not fire.
    ///
    /// With IP discovery enabled, a candidate whose public IP cannot be found is not
    /// committed: the discovery error is returned, the cursor stays on that candidate
    /// and the rotate hook does not fire. `None` is also returned when
    /// [`Rotator::setup`] replaces the registry mid-rotation.
    #[instrument(skip(self))]
    pub async fn rotate(&self) -> Result<Option<ProxyEntry>> {
        let _guard = self.rotation.lock().await;
        self.counter.reset();

        let config = self.config();
        let checker = HealthChecker::new(&config);
        let (size, generation) = {
            let registry = self.registry.read();
            (registry.len(), registry.generation())
        };

        for _ in 1..size {
            let next = {
                let mut registry = self.registry.write();
                if registry.generation() != generation {
                    debug!("Registry replaced, abandoning rotation");
                    return Ok(None);
                }
                registry.advance()
            };
            let Some((index, candidate)) = next else {
                break;
            };

            if !checker.probe(Some(candidate.agent())).await {
                debug!("Proxy {} failed its probe", candidate.endpoint().address());
                continue;
            }

            let public_ip = if config.ip_discovery_enabled {
                // Each failed attempt was already reported by the checker.
                Some(checker.discover_public_ip(Some(candidate.agent())).await?)
            } else {
                None
            };

            let entry = {
                let mut registry = self.registry.write();
                if registry.generation() != generation {
                    debug!("Registry replaced, abandoning rotation");
                    return Ok(None);
                }
                match public_ip {
                    Some(ip) => registry.set_public_ip(index, ip).unwrap_or(candidate),
                    None => candidate,
                }
            };

            info!(
                "Rotated to proxy {} (public IP: {})",
                entry.endpoint().address(),
                entry.public_ip().unwrap_or("unknown")
            );
            (config.on_rotate)(&entry);
            return Ok(Some(entry));
        }

        if size > 1 {
            warn!("No healthy proxy found among {} candidates", size - 1);
        }
        Ok(None)
    }
}
