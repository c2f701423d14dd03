//! Explicit process-wide session context.
//!
//! Replaces ambient global client state with a value the caller
//! constructs, passes around, and closes: the session owns the registry
//! and resolver, and `close` tears down every service it still tracks.

use std::sync::Arc;

use tokio::sync::watch;

use tether_common::config::LifecycleConfig;
use tether_common::error::Result;
use tether_common::types::ScopeId;
use tether_core::binding::{BindingResolver, BindingSet};
use tether_core::descriptor::ServiceDescriptor;
use tether_core::lifecycle::LifecycleCoordinator;
use tether_core::probe::ReadinessProbe;
use tether_core::registry::ServiceRegistry;
use tether_core::runtime::{ContainerRuntime, NamespaceInjector};

/// Owning context for service binding within one process.
///
/// Construct once, share by reference (or clone the inner handles), and
/// call [`close`](Self::close) when done; services with live bindings at
/// close time are stopped regardless.
pub struct Session {
    registry: Arc<ServiceRegistry>,
    resolver: BindingResolver,
}

impl Session {
    /// Creates a session over a container runtime and namespace injector.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        injector: Arc<dyn NamespaceInjector>,
        config: LifecycleConfig,
    ) -> Self {
        let coordinator = Arc::new(LifecycleCoordinator::new(runtime, config));
        let registry = Arc::new(ServiceRegistry::new(coordinator));
        let resolver = BindingResolver::new(Arc::clone(&registry), injector);
        Self { registry, resolver }
    }

    /// Creates a session with a custom readiness probe for descriptors
    /// using `ReadinessPolicy::Probe`.
    #[must_use]
    pub fn with_probe(
        runtime: Arc<dyn ContainerRuntime>,
        injector: Arc<dyn NamespaceInjector>,
        probe: Arc<dyn ReadinessProbe>,
        config: LifecycleConfig,
    ) -> Self {
        let coordinator = Arc::new(LifecycleCoordinator::with_probe(runtime, probe, config));
        let registry = Arc::new(ServiceRegistry::new(coordinator));
        let resolver = BindingResolver::new(Arc::clone(&registry), injector);
        Self { registry, resolver }
    }

    /// Returns the service registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Returns the binding resolver.
    #[must_use]
    pub const fn resolver(&self) -> &BindingResolver {
        &self.resolver
    }

    /// Resolves the requested bindings for a dependent execution scope.
    ///
    /// # Errors
    ///
    /// See [`BindingResolver::resolve`].
    pub async fn bind(
        &self,
        scope: &ScopeId,
        requests: &[(String, ServiceDescriptor)],
    ) -> Result<BindingSet> {
        self.resolver.resolve(scope, requests).await
    }

    /// Resolves bindings with a cancel signal.
    ///
    /// # Errors
    ///
    /// See [`BindingResolver::resolve_with_cancel`].
    pub async fn bind_with_cancel(
        &self,
        scope: &ScopeId,
        requests: &[(String, ServiceDescriptor)],
        cancel: watch::Receiver<bool>,
    ) -> Result<BindingSet> {
        self.resolver.resolve_with_cancel(scope, requests, cancel).await
    }

    /// Releases a binding set once the dependent execution terminates.
    ///
    /// Safe to call on success, failure, or cancellation paths;
    /// idempotent per set.
    pub async fn unbind(&self, set: &mut BindingSet) {
        self.resolver.release(set).await;
    }

    /// Tears down every tracked service and closes the session.
    pub async fn close(self) {
        self.registry.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
