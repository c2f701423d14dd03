//! Immutable service descriptors and their content-derived identity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tether_common::error::{Result, TetherError};
use tether_common::types::{DescriptorId, ExposedPort};

/// Condition under which a starting service is considered usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessPolicy {
    /// The first exposed TCP port accepts connections.
    PortListen,
    /// A fixed delay after launch.
    Delay(Duration),
    /// The coordinator's configured probe reports the endpoint healthy.
    Probe,
}

impl ReadinessPolicy {
    /// Whether this policy checks readiness against an exposed port.
    #[must_use]
    pub const fn requires_port(&self) -> bool {
        matches!(self, Self::PortListen | Self::Probe)
    }
}

/// Immutable description of a runnable service.
///
/// Equality and identity derive deterministically from the configuration,
/// so repeated construction with the same fields resolves to the same
/// registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    image: String,
    command: Vec<String>,
    env: Vec<(String, String)>,
    exposed_ports: Vec<ExposedPort>,
    readiness: ReadinessPolicy,
}

impl ServiceDescriptor {
    /// Creates a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` if the image is empty, or if no port is
    /// exposed while the readiness policy performs port-based checking.
    pub fn new(
        image: impl Into<String>,
        command: Vec<String>,
        env: Vec<(String, String)>,
        exposed_ports: Vec<ExposedPort>,
        readiness: ReadinessPolicy,
    ) -> Result<Self> {
        let image = image.into();
        if image.is_empty() {
            return Err(TetherError::InvalidDescriptor {
                message: "image is required".into(),
            });
        }
        if exposed_ports.is_empty() && readiness.requires_port() {
            return Err(TetherError::InvalidDescriptor {
                message: "port-based readiness requires at least one exposed port".into(),
            });
        }
        Ok(Self {
            image,
            command,
            env,
            exposed_ports,
            readiness,
        })
    }

    /// Returns the image source URI.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Returns the command executed inside the service.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Returns the environment variables passed to the service.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Returns the ports the service exposes to dependents.
    #[must_use]
    pub fn exposed_ports(&self) -> &[ExposedPort] {
        &self.exposed_ports
    }

    /// Returns the primary exposed port, if any.
    #[must_use]
    pub fn primary_port(&self) -> Option<ExposedPort> {
        self.exposed_ports.first().copied()
    }

    /// Returns the readiness policy.
    #[must_use]
    pub const fn readiness(&self) -> &ReadinessPolicy {
        &self.readiness
    }

    /// Computes the content identity of this descriptor.
    ///
    /// A SHA-256 digest over a length-framed encoding of every field;
    /// stable across calls and across processes for identical
    /// configuration.
    #[must_use]
    pub fn identity(&self) -> DescriptorId {
        let mut hasher = Sha256::new();
        frame(&mut hasher, self.image.as_bytes());
        for arg in &self.command {
            frame(&mut hasher, arg.as_bytes());
        }
        for (key, value) in &self.env {
            frame(&mut hasher, key.as_bytes());
            frame(&mut hasher, value.as_bytes());
        }
        for exposed in &self.exposed_ports {
            frame(&mut hasher, &exposed.port.to_be_bytes());
            frame(&mut hasher, exposed.protocol.to_string().as_bytes());
        }
        match &self.readiness {
            ReadinessPolicy::PortListen => frame(&mut hasher, b"port-listen"),
            ReadinessPolicy::Delay(delay) => {
                frame(&mut hasher, b"delay");
                frame(&mut hasher, &delay.as_millis().to_be_bytes());
            }
            ReadinessPolicy::Probe => frame(&mut hasher, b"probe"),
        }
        DescriptorId::from_digest(&hasher.finalize())
    }
}

/// Feeds a length-prefixed field into the hasher.
///
/// The prefix prevents distinct field sequences from colliding on
/// concatenation (e.g. `["ab"]` vs `["a", "b"]`).
fn frame(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::types::Protocol;

    fn http_descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new(
            "file:///opt/images/python",
            vec!["python".into(), "-m".into(), "http.server".into(), "8080".into()],
            vec![],
            vec![ExposedPort::tcp(8080)],
            ReadinessPolicy::PortListen,
        )
        .expect("valid descriptor")
    }

    #[test]
    fn identity_is_stable_across_calls() {
        let a = http_descriptor();
        let b = http_descriptor();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_changes_with_command() {
        let a = http_descriptor();
        let b = ServiceDescriptor::new(
            "file:///opt/images/python",
            vec!["python".into(), "-m".into(), "http.server".into(), "9090".into()],
            vec![],
            vec![ExposedPort::tcp(8080)],
            ReadinessPolicy::PortListen,
        )
        .expect("valid descriptor");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn identity_changes_with_exposed_port() {
        let a = http_descriptor();
        let b = ServiceDescriptor::new(
            "file:///opt/images/python",
            vec!["python".into(), "-m".into(), "http.server".into(), "8080".into()],
            vec![],
            vec![ExposedPort::tcp(8081)],
            ReadinessPolicy::PortListen,
        )
        .expect("valid descriptor");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn identity_distinguishes_field_boundaries() {
        let a = ServiceDescriptor::new(
            "img",
            vec!["ab".into()],
            vec![],
            vec![],
            ReadinessPolicy::Delay(Duration::from_millis(0)),
        )
        .expect("valid");
        let b = ServiceDescriptor::new(
            "img",
            vec!["a".into(), "b".into()],
            vec![],
            vec![],
            ReadinessPolicy::Delay(Duration::from_millis(0)),
        )
        .expect("valid");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn port_based_readiness_without_ports_is_rejected() {
        let result = ServiceDescriptor::new(
            "file:///opt/images/worker",
            vec!["./worker".into()],
            vec![],
            vec![],
            ReadinessPolicy::PortListen,
        );
        assert!(matches!(
            result,
            Err(TetherError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn delay_readiness_without_ports_is_allowed() {
        let result = ServiceDescriptor::new(
            "file:///opt/images/worker",
            vec!["./worker".into()],
            vec![],
            vec![],
            ReadinessPolicy::Delay(Duration::from_millis(50)),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn empty_image_is_rejected() {
        let result = ServiceDescriptor::new(
            "",
            vec![],
            vec![],
            vec![ExposedPort::tcp(80)],
            ReadinessPolicy::PortListen,
        );
        assert!(matches!(
            result,
            Err(TetherError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn udp_and_tcp_ports_hash_differently() {
        let tcp = ServiceDescriptor::new(
            "img",
            vec![],
            vec![],
            vec![ExposedPort {
                port: 53,
                protocol: Protocol::Tcp,
            }],
            ReadinessPolicy::PortListen,
        )
        .expect("valid");
        let udp = ServiceDescriptor::new(
            "img",
            vec![],
            vec![],
            vec![ExposedPort {
                port: 53,
                protocol: Protocol::Udp,
            }],
            ReadinessPolicy::PortListen,
        )
        .expect("valid");
        assert_ne!(tcp.identity(), udp.identity());
    }
}
