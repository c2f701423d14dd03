//! Lifecycle coordination: startup, readiness waiting, and teardown.
//!
//! Drives each instance through the Starting → Ready / Failed →
//! Stopping → Stopped state machine against the backend runtime.

use std::sync::Arc;

use tether_common::config::LifecycleConfig;
use tether_common::error::{Result, TetherError};
use tether_common::types::{DescriptorId, Endpoint, ProcessHandle, ServiceState};

use crate::descriptor::ReadinessPolicy;
use crate::probe::{ReadinessProbe, TcpConnectProbe};
use crate::registry::ServiceInstance;
use crate::runtime::ContainerRuntime;

/// Supervises service startup order, readiness, and teardown.
pub struct LifecycleCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
    /// Probe used for `ReadinessPolicy::Probe`.
    probe: Arc<dyn ReadinessProbe>,
    /// Built-in probe for `ReadinessPolicy::PortListen`.
    tcp_probe: TcpConnectProbe,
    config: LifecycleConfig,
}

impl LifecycleCoordinator {
    /// Creates a coordinator over the given runtime.
    ///
    /// `ReadinessPolicy::Probe` falls back to TCP connect checking until
    /// a custom probe is supplied via [`with_probe`](Self::with_probe).
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: LifecycleConfig) -> Self {
        Self {
            runtime,
            probe: Arc::new(TcpConnectProbe::default()),
            tcp_probe: TcpConnectProbe::default(),
            config,
        }
    }

    /// Creates a coordinator with a custom probe for
    /// `ReadinessPolicy::Probe` descriptors.
    #[must_use]
    pub fn with_probe(
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn ReadinessProbe>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            runtime,
            probe,
            tcp_probe: TcpConnectProbe::default(),
            config,
        }
    }

    /// Returns the lifecycle tuning configuration.
    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Runs the startup sequence for a Starting instance.
    ///
    /// Launches the service, publishes its endpoint, waits for readiness,
    /// and moves the instance to Ready. On any failure the launched
    /// process is reclaimed best-effort and the instance moves to Failed
    /// with the error stored for every waiter.
    ///
    /// # Errors
    ///
    /// Returns the failure that was recorded on the instance.
    pub(crate) async fn start(&self, instance: &ServiceInstance) -> Result<()> {
        let identity = instance.identity().clone();
        tracing::info!(
            identity = %identity,
            image = instance.descriptor().image(),
            "launching service"
        );

        let handle = match self.runtime.launch(instance.descriptor()).await {
            Ok(handle) => handle,
            Err(error) => {
                instance.fail(error.clone());
                return Err(error);
            }
        };
        instance.set_handle(handle.clone());

        let endpoint = match self.runtime.network_address(&handle).await {
            Ok(endpoint) => endpoint,
            Err(error) => {
                self.reclaim(&identity, instance).await;
                instance.fail(error.clone());
                return Err(error);
            }
        };
        instance.set_endpoint(endpoint.clone());

        if let Err(error) = self
            .await_ready(&identity, &endpoint, instance.descriptor().readiness())
            .await
        {
            self.reclaim(&identity, instance).await;
            instance.fail(error.clone());
            return Err(error);
        }

        if instance.transition(ServiceState::Starting, ServiceState::Ready) {
            tracing::info!(identity = %identity, endpoint = %endpoint, "service ready");
            Ok(())
        } else {
            // The registry shut down mid-startup and claimed the stop; if
            // it has not consumed the handle yet, teardown is ours.
            self.reclaim(&identity, instance).await;
            Err(TetherError::Canceled)
        }
    }

    /// Tears down an instance whose stop has been committed.
    ///
    /// Best-effort and idempotent: a backend error is logged as a
    /// non-fatal `TeardownError` and the instance still ends Stopped.
    pub(crate) async fn stop(&self, instance: &ServiceInstance) {
        let identity = instance.identity().clone();
        if let Some(handle) = instance.take_handle() {
            if let Err(error) = self.runtime.terminate(&handle).await {
                let error = TetherError::TeardownError {
                    identity: identity.clone(),
                    message: error.to_string(),
                };
                tracing::warn!(identity = %identity, error = %error, "teardown failed; instance removed anyway");
            }
        }
        instance.set_state(ServiceState::Stopped);
        tracing::info!(identity = %identity, "service stopped");
    }

    /// Waits until the readiness policy is satisfied.
    async fn await_ready(
        &self,
        identity: &DescriptorId,
        endpoint: &Endpoint,
        policy: &ReadinessPolicy,
    ) -> Result<()> {
        match policy {
            ReadinessPolicy::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            ReadinessPolicy::PortListen => self.poll(identity, endpoint, &self.tcp_probe).await,
            ReadinessPolicy::Probe => {
                self.poll(identity, endpoint, self.probe.as_ref()).await
            }
        }
    }

    /// Polls the probe with bounded exponential backoff under the total
    /// readiness timeout. First success wins.
    async fn poll(
        &self,
        identity: &DescriptorId,
        endpoint: &Endpoint,
        probe: &dyn ReadinessProbe,
    ) -> Result<()> {
        let total = self.config.readiness_timeout;
        let polling = async {
            let mut delay = self.config.probe_initial_delay;
            let mut attempts: u32 = 0;
            loop {
                if probe.check_ready(endpoint).await {
                    tracing::debug!(identity = %identity, attempts, "readiness probe succeeded");
                    return;
                }
                attempts += 1;
                tokio::time::sleep(delay).await;
                delay = delay
                    .mul_f64(self.config.probe_backoff_multiplier)
                    .min(self.config.probe_max_delay);
            }
        };
        if tokio::time::timeout(total, polling).await.is_ok() {
            Ok(())
        } else {
            Err(TetherError::ReadinessTimeout {
                identity: identity.clone(),
                waited_ms: u64::try_from(total.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    /// Reclaims the launched process, if this caller still owns it.
    async fn reclaim(&self, identity: &DescriptorId, instance: &ServiceInstance) {
        if let Some(handle) = instance.take_handle() {
            self.terminate_quietly(identity, &handle).await;
        }
    }

    async fn terminate_quietly(&self, identity: &DescriptorId, handle: &ProcessHandle) {
        if let Err(error) = self.runtime.terminate(handle).await {
            tracing::warn!(identity = %identity, error = %error, "best-effort teardown failed");
        }
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
