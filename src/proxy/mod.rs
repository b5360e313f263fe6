//! Proxy rotation client
//!
//! This module provides:
//! - Proxy spec parsing
//! - HTTP and SOCKS agent binding
//! - The proxy registry and request counters
//! - Health checking and public IP discovery
//! - Rotation behind a single request interface

pub mod agent;
pub mod counter;
pub mod health;
pub mod parser;
pub mod registry;
pub mod rotation;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentKind, ProxyAgent};
pub use counter::{RequestCounter, RequestCounts};
pub use health::HealthChecker;
pub use parser::parse;
pub use registry::ProxyRegistry;
pub use rotation::Rotator;
pub use transport::{
    FnTransport, ReqwestTransport, RequestOptions, RequestTransport, TransportResponse,
    TunnelTransport,
};
