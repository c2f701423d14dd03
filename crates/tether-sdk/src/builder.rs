//! Fluent API for describing dependency services.

use std::time::Duration;

use tether_common::error::Result;
use tether_common::types::{ExposedPort, Protocol};
use tether_core::descriptor::{ReadinessPolicy, ServiceDescriptor};

/// Builder for a [`ServiceDescriptor`].
///
/// Each call consumes and returns the builder; the chain ends in
/// [`build`](Self::build), which validates and produces the immutable
/// descriptor value.
#[derive(Debug)]
pub struct ServiceBuilder {
    image: String,
    command: Vec<String>,
    env: Vec<(String, String)>,
    exposed_ports: Vec<ExposedPort>,
    readiness: ReadinessPolicy,
}

impl ServiceBuilder {
    /// Creates a new builder for a service from the given image.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            env: Vec::new(),
            exposed_ports: Vec::new(),
            readiness: ReadinessPolicy::PortListen,
        }
    }

    /// Sets the command to run inside the service.
    #[must_use]
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Exposes a port to dependents.
    #[must_use]
    pub fn expose(mut self, port: u16, protocol: Protocol) -> Self {
        self.exposed_ports.push(ExposedPort { port, protocol });
        self
    }

    /// Exposes a TCP port to dependents.
    #[must_use]
    pub fn expose_tcp(self, port: u16) -> Self {
        self.expose(port, Protocol::Tcp)
    }

    /// Sets the readiness policy (defaults to `PortListen`).
    #[must_use]
    pub fn readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    /// Considers the service ready after a fixed delay.
    #[must_use]
    pub fn ready_after(self, delay: Duration) -> Self {
        self.readiness(ReadinessPolicy::Delay(delay))
    }

    /// Builds and returns the validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` if the image is empty, or if no port
    /// is exposed while the readiness policy performs port-based
    /// checking.
    pub fn build(self) -> Result<ServiceDescriptor> {
        ServiceDescriptor::new(
            self.image,
            self.command,
            self.env,
            self.exposed_ports,
            self.readiness,
        )
    }
}
