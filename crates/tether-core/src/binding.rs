//! Binding resolution for dependent executions.
//!
//! Turns an ordered list of `(name, descriptor)` requests into endpoints
//! injected under those names into the dependent execution's scope, with
//! full rollback on failure: a resolution either applies completely or
//! releases every reference it acquired.

use std::sync::Arc;

use tokio::sync::watch;

use tether_common::error::{Result, TetherError};
use tether_common::types::{Endpoint, ScopeId};

use crate::descriptor::ServiceDescriptor;
use crate::registry::{ServiceInstance, ServiceRegistry};
use crate::runtime::NamespaceInjector;

/// One resolved name → service association held by a dependent execution.
#[derive(Debug, Clone)]
pub struct Binding {
    name: String,
    endpoint: Endpoint,
    instance: Arc<ServiceInstance>,
}

impl Binding {
    /// Returns the name the service is bound under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the endpoint the name resolves to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the instance this binding references.
    #[must_use]
    pub const fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

/// All bindings resolved for one dependent execution.
///
/// Holds one registry reference per binding until released. Dropping the
/// set without releasing leaks references; always pass it back to
/// [`BindingResolver::release`] when the execution terminates.
#[derive(Debug)]
pub struct BindingSet {
    scope: ScopeId,
    bindings: Vec<Binding>,
    released: bool,
}

impl BindingSet {
    /// Returns the scope these bindings were injected into.
    #[must_use]
    pub const fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Returns the resolved bindings in input order.
    #[must_use]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Returns the endpoint bound under `name`, if present.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.bindings
            .iter()
            .find(|binding| binding.name == name)
            .map(Binding::endpoint)
    }

    /// Returns the number of bindings in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns whether the set contains no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Resolves declared bindings against the registry and injects the
/// resulting endpoints into dependent execution scopes.
pub struct BindingResolver {
    registry: Arc<ServiceRegistry>,
    injector: Arc<dyn NamespaceInjector>,
}

impl std::fmt::Debug for BindingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingResolver").finish_non_exhaustive()
    }
}

impl BindingResolver {
    /// Creates a resolver over a registry and a namespace injector.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, injector: Arc<dyn NamespaceInjector>) -> Self {
        Self { registry, injector }
    }

    /// Resolves every requested binding, in input order.
    ///
    /// Each service is acquired (starting it if needed) and awaited until
    /// Ready, then injected into the scope under its bound name.
    ///
    /// # Errors
    ///
    /// Returns `BindingFailed` naming the first failing binding. Every
    /// reference acquired by this call (including the failing one) has
    /// been released before the error returns; nothing is partially
    /// applied.
    pub async fn resolve(
        &self,
        scope: &ScopeId,
        requests: &[(String, ServiceDescriptor)],
    ) -> Result<BindingSet> {
        self.resolve_inner(scope, requests, None).await
    }

    /// Like [`resolve`](Self::resolve), but abortable.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` when the signal flips to `true` mid-resolution;
    /// partially acquired references are released first. Otherwise as
    /// `resolve`.
    pub async fn resolve_with_cancel(
        &self,
        scope: &ScopeId,
        requests: &[(String, ServiceDescriptor)],
        cancel: watch::Receiver<bool>,
    ) -> Result<BindingSet> {
        self.resolve_inner(scope, requests, Some(cancel)).await
    }

    /// Releases every binding in the set exactly once.
    ///
    /// Idempotent: a second call on the same set is a no-op. Also clears
    /// the scope's injected names.
    pub async fn release(&self, set: &mut BindingSet) {
        if set.released {
            return;
        }
        set.released = true;
        for binding in &set.bindings {
            self.registry.release(&binding.instance);
        }
        if let Err(error) = self.injector.clear(&set.scope).await {
            tracing::warn!(scope = %set.scope, error = %error, "failed to clear injected names");
        }
        tracing::debug!(scope = %set.scope, count = set.bindings.len(), "released bindings");
    }

    async fn resolve_inner(
        &self,
        scope: &ScopeId,
        requests: &[(String, ServiceDescriptor)],
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<BindingSet> {
        let mut acquired: Vec<Binding> = Vec::with_capacity(requests.len());

        for (name, descriptor) in requests {
            match self.resolve_one(descriptor, cancel.as_mut()).await {
                Ok((instance, endpoint)) => {
                    tracing::debug!(scope = %scope, name = %name, endpoint = %endpoint, "binding resolved");
                    acquired.push(Binding {
                        name: name.clone(),
                        endpoint,
                        instance,
                    });
                }
                Err(error) => {
                    self.rollback(&acquired);
                    return Err(match error {
                        TetherError::Canceled => TetherError::Canceled,
                        other => TetherError::BindingFailed {
                            name: name.clone(),
                            source: Box::new(other),
                        },
                    });
                }
            }
        }

        for binding in &acquired {
            if let Err(error) = self
                .injector
                .inject(scope, &binding.name, &binding.endpoint)
                .await
            {
                self.rollback(&acquired);
                if let Err(clear_error) = self.injector.clear(scope).await {
                    tracing::warn!(scope = %scope, error = %clear_error, "failed to clear partial injection");
                }
                return Err(TetherError::BindingFailed {
                    name: binding.name.clone(),
                    source: Box::new(error),
                });
            }
        }

        Ok(BindingSet {
            scope: scope.clone(),
            bindings: acquired,
            released: false,
        })
    }

    /// Acquires one service and waits until it settles.
    ///
    /// On failure the freshly acquired reference is released before the
    /// error propagates, so the caller only rolls back earlier bindings.
    async fn resolve_one(
        &self,
        descriptor: &ServiceDescriptor,
        cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<(Arc<ServiceInstance>, Endpoint)> {
        let instance = self.registry.acquire(descriptor)?;
        let waited = match cancel {
            Some(cancel) => instance.wait_ready_with_cancel(cancel).await,
            None => instance.wait_ready().await,
        };
        match waited {
            Ok(endpoint) => Ok((instance, endpoint)),
            Err(error) => {
                self.registry.release(&instance);
                Err(error)
            }
        }
    }

    fn rollback(&self, acquired: &[Binding]) {
        for binding in acquired {
            self.registry.release(&binding.instance);
        }
    }
}
