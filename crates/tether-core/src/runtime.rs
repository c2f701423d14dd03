//! External collaborator interfaces: the container runtime that launches
//! services, and the namespace injector that makes bound names resolvable
//! inside a dependent execution.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use tether_common::error::Result;
use tether_common::types::{Endpoint, ProcessHandle, ScopeId};

use crate::descriptor::ServiceDescriptor;

/// Backend that launches and terminates service processes.
///
/// Implementors handle the engine-specific details; the core treats the
/// runtime's own protocol as opaque.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launches the described service, returning an opaque handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be launched.
    async fn launch(&self, descriptor: &ServiceDescriptor) -> Result<ProcessHandle>;

    /// Terminates a previously launched service.
    ///
    /// Must be idempotent: terminating a service the backend has already
    /// reaped is a success, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown fails for any other reason.
    async fn terminate(&self, handle: &ProcessHandle) -> Result<()>;

    /// Returns the host-reachable address of a launched service.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be determined.
    async fn network_address(&self, handle: &ProcessHandle) -> Result<Endpoint>;
}

/// Makes bound names resolvable within a dependent execution's scope.
#[async_trait]
pub trait NamespaceInjector: Send + Sync {
    /// Makes `name` resolve to `endpoint` inside the given scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the name cannot be injected.
    async fn inject(&self, scope: &ScopeId, name: &str, endpoint: &Endpoint) -> Result<()>;

    /// Removes every name previously injected for the scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope cannot be cleared.
    async fn clear(&self, scope: &ScopeId) -> Result<()>;
}

/// In-memory scoped name table.
///
/// Reference [`NamespaceInjector`] used by tests and examples; a
/// production deployment would put a per-execution DNS shim behind the
/// same trait and serve lookups from an equivalent table.
#[derive(Debug, Default)]
pub struct InMemoryInjector {
    entries: Mutex<HashMap<ScopeId, HashMap<String, Endpoint>>>,
}

impl InMemoryInjector {
    /// Creates an empty injector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a name within a scope, as the dependent execution would.
    #[must_use]
    pub fn lookup(&self, scope: &ScopeId, name: &str) -> Option<Endpoint> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .and_then(|names| names.get(name).cloned())
    }

    /// Returns the number of names injected for a scope.
    #[must_use]
    pub fn scope_len(&self, scope: &ScopeId) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl NamespaceInjector for InMemoryInjector {
    async fn inject(&self, scope: &ScopeId, name: &str, endpoint: &Endpoint) -> Result<()> {
        tracing::debug!(scope = %scope, name, endpoint = %endpoint, "injecting binding");
        let _ = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope.clone())
            .or_default()
            .insert(name.to_string(), endpoint.clone());
        Ok(())
    }

    async fn clear(&self, scope: &ScopeId) -> Result<()> {
        let _ = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scope);
        Ok(())
    }
}
