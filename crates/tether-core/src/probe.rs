//! Readiness probing.
//!
//! The coordinator polls a probe until it reports the endpoint usable or
//! the readiness timeout elapses.

use std::time::Duration;

use async_trait::async_trait;

use tether_common::types::Endpoint;

/// Pluggable readiness check invoked by the coordinator's polling loop.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Returns `true` once the endpoint is usable by dependents.
    ///
    /// Failures are recovered locally by the polling loop; implementations
    /// report `false` rather than erroring.
    async fn check_ready(&self, endpoint: &Endpoint) -> bool;
}

/// Probe that attempts a TCP connection to the endpoint.
///
/// The default probe for `ReadinessPolicy::PortListen`.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    connect_timeout: Duration,
}

impl TcpConnectProbe {
    /// Creates a probe with the given per-attempt connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self::new(tether_common::constants::DEFAULT_PROBE_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl ReadinessProbe for TcpConnectProbe {
    async fn check_ready(&self, endpoint: &Endpoint) -> bool {
        let address = (endpoint.host.as_str(), endpoint.port);
        match tokio::time::timeout(self.connect_timeout, tokio::net::TcpStream::connect(address))
            .await
        {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                tracing::trace!(endpoint = %endpoint, error = %err, "probe connect refused");
                false
            }
            Err(_elapsed) => {
                tracing::trace!(endpoint = %endpoint, "probe connect timed out");
                false
            }
        }
    }
}
