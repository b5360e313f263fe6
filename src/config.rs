use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::error::{Result, RotaError};
use crate::models::ProxyEntry;
use crate::proxy::transport::{ReqwestTransport, RequestTransport};

pub const DEFAULT_ROTATE_THRESHOLD: u32 = 0;
pub const DEFAULT_FAIL_THRESHOLD: u32 = 5;
pub const DEFAULT_CHECK_URL: &str = "https://google.com";
pub const DEFAULT_CHECK_THRESHOLD: u32 = 3;
pub const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org/?format=json";
pub const DEFAULT_SCHEME: &str = "http";

/// Called with the new current entry after a committed rotation
pub type RotateHook = Arc<dyn Fn(&ProxyEntry) + Send + Sync>;

/// Called with every recoverable error
pub type ErrorHook = Arc<dyn Fn(&RotaError) + Send + Sync>;

/// Rotator configuration
///
/// Cloning is cheap; the transport and hooks are shared.
#[derive(Clone)]
pub struct RotatorConfig {
    /// Performs the actual network calls
    pub transport: Arc<dyn RequestTransport>,
    /// Successes before rotating (0 = never)
    pub rotate_threshold: u32,
    /// Failures before rotating (0 = never)
    pub fail_threshold: u32,
    /// Whether probes hit the network at all
    pub check_enabled: bool,
    /// Target of liveness probes
    pub check_url: String,
    /// Attempts per probe and per IP discovery
    pub check_threshold: u32,
    /// Whether a committed rotation records the proxy's public IP
    pub ip_discovery_enabled: bool,
    /// JSON endpoint answering `{"ip": "..."}`
    pub ip_echo_url: String,
    /// Scheme assumed for specs that carry none
    pub default_scheme: String,
    pub on_rotate: RotateHook,
    pub on_error: ErrorHook,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
            rotate_threshold: DEFAULT_ROTATE_THRESHOLD,
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            check_enabled: true,
            check_url: DEFAULT_CHECK_URL.to_string(),
            check_threshold: DEFAULT_CHECK_THRESHOLD,
            ip_discovery_enabled: true,
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            default_scheme: DEFAULT_SCHEME.to_string(),
            on_rotate: Arc::new(|_: &ProxyEntry| {}),
            on_error: Arc::new(|e: &RotaError| error!("Proxy rotation error: {}", e)),
        }
    }
}

impl std::fmt::Debug for RotatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatorConfig")
            .field("rotate_threshold", &self.rotate_threshold)
            .field("fail_threshold", &self.fail_threshold)
            .field("check_enabled", &self.check_enabled)
            .field("check_url", &self.check_url)
            .field("check_threshold", &self.check_threshold)
            .field("ip_discovery_enabled", &self.ip_discovery_enabled)
            .field("ip_echo_url", &self.ip_echo_url)
            .field("default_scheme", &self.default_scheme)
            .finish_non_exhaustive()
    }
}

impl RotatorConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let timeout_secs: u64 = parse_env("ROTA_REQUEST_TIMEOUT", "0")?;
        let transport: Arc<dyn RequestTransport> = if timeout_secs > 0 {
            Arc::new(ReqwestTransport::with_timeout(Duration::from_secs(
                timeout_secs,
            )))
        } else {
            defaults.transport.clone()
        };

        Ok(Self {
            transport,
            rotate_threshold: parse_env("ROTA_ROTATE_THRESHOLD", "0")?,
            fail_threshold: parse_env("ROTA_FAIL_THRESHOLD", "5")?,
            check_enabled: parse_env("ROTA_CHECK_ENABLED", "true")?,
            check_url: get_env_or("ROTA_CHECK_URL", DEFAULT_CHECK_URL),
            check_threshold: parse_env("ROTA_CHECK_THRESHOLD", "3")?,
            ip_discovery_enabled: parse_env("ROTA_IP_DISCOVERY_ENABLED", "true")?,
            ip_echo_url: get_env_or("ROTA_IP_ECHO_URL", DEFAULT_IP_ECHO_URL),
            default_scheme: get_env_or("ROTA_DEFAULT_SCHEME", DEFAULT_SCHEME),
            ..defaults
        })
    }

    pub fn with_transport(mut self, transport: impl RequestTransport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn on_rotate(mut self, hook: impl Fn(&ProxyEntry) + Send + Sync + 'static) -> Self {
        self.on_rotate = Arc::new(hook);
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&RotaError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(hook);
        self
    }

    pub(crate) fn report(&self, err: &RotaError) {
        (self.on_error)(err);
    }
}

/// Proxy specs listed in `ROTA_PROXIES`, comma-separated
pub fn proxies_from_env() -> Vec<String> {
    get_env_or("ROTA_PROXIES", "")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RotaError::InvalidConfig(format!("{} has an invalid value", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
