//! Service instance registry.
//!
//! Holds the authoritative mapping from descriptor identity to running
//! instance, deduplicating concurrent starts so that at most one instance
//! per identity is ever Starting or Ready.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use tether_common::error::{Result, TetherError};
use tether_common::types::{DescriptorId, Endpoint, ProcessHandle, ServiceState};

use crate::descriptor::ServiceDescriptor;
use crate::lifecycle::LifecycleCoordinator;

/// Mutable bookkeeping for one instance, guarded by its own lock.
#[derive(Debug, Default)]
struct InstanceShared {
    /// Number of live bindings pointing at this instance.
    ref_count: usize,
    /// Handle issued by the backend at launch.
    handle: Option<ProcessHandle>,
    /// Published host-reachable address.
    endpoint: Option<Endpoint>,
    /// Startup failure, surfaced to every waiter.
    failure: Option<TetherError>,
    /// Invalidates pending grace-period stops; bumped on every
    /// acquire and on every zero-reference transition.
    stop_epoch: u64,
}

/// A running (or starting) service tracked by the registry.
///
/// State transitions are published through a watch channel so any number
/// of waiters observe exactly one Starting→Ready or Starting→Failed edge.
#[derive(Debug)]
pub struct ServiceInstance {
    identity: DescriptorId,
    descriptor: ServiceDescriptor,
    state_tx: watch::Sender<ServiceState>,
    shared: Mutex<InstanceShared>,
    started_at: String,
}

impl ServiceInstance {
    fn new(identity: DescriptorId, descriptor: ServiceDescriptor) -> Self {
        let (state_tx, _state_rx) = watch::channel(ServiceState::Starting);
        Self {
            identity,
            descriptor,
            state_tx,
            shared: Mutex::new(InstanceShared {
                // Created on behalf of the first acquirer.
                ref_count: 1,
                ..InstanceShared::default()
            }),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Returns the descriptor identity this instance was started for.
    #[must_use]
    pub const fn identity(&self) -> &DescriptorId {
        &self.identity
    }

    /// Returns the descriptor this instance was started from.
    #[must_use]
    pub const fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Returns the published endpoint, if the instance reached Ready.
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.lock_shared().endpoint.clone()
    }

    /// Returns the number of live bindings pointing at this instance.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.lock_shared().ref_count
    }

    /// Returns the startup failure, if the instance reached Failed.
    #[must_use]
    pub fn failure(&self) -> Option<TetherError> {
        self.lock_shared().failure.clone()
    }

    /// Returns the ISO-8601 timestamp at which startup began.
    #[must_use]
    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Suspends until the instance is Ready (returning its endpoint) or
    /// Failed (returning the startup error).
    ///
    /// # Errors
    ///
    /// Returns the instance's startup failure, or `Closed` if the
    /// instance was torn down while waiting.
    pub async fn wait_ready(&self) -> Result<Endpoint> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            match *state_rx.borrow_and_update() {
                ServiceState::Ready => {
                    return self.endpoint().ok_or(TetherError::Closed);
                }
                ServiceState::Failed => {
                    return Err(self.failure().unwrap_or(TetherError::Closed));
                }
                ServiceState::Stopping | ServiceState::Stopped => {
                    return Err(TetherError::Closed);
                }
                ServiceState::Starting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(TetherError::Closed);
            }
        }
    }

    /// Like [`wait_ready`](Self::wait_ready), but abortable through a
    /// cancel signal.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` when the signal flips to `true` before the
    /// instance settles; otherwise as `wait_ready`.
    pub async fn wait_ready_with_cancel(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Endpoint> {
        loop {
            if *cancel.borrow_and_update() {
                return Err(TetherError::Canceled);
            }
            tokio::select! {
                result = self.wait_ready() => return result,
                changed = cancel.changed() => {
                    if changed.is_err() {
                        // Cancel source dropped; fall back to a plain wait.
                        return self.wait_ready().await;
                    }
                }
            }
        }
    }

    fn lock_shared(&self) -> MutexGuard<'_, InstanceShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically moves `from` → `to`; returns whether this call won the
    /// transition.
    pub(crate) fn transition(&self, from: ServiceState, to: ServiceState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn set_state(&self, state: ServiceState) {
        let _ = self.state_tx.send_replace(state);
    }

    /// Records the startup failure and moves Starting → Failed.
    ///
    /// The failure is stored before the transition publishes, so waiters
    /// that observe Failed always find it.
    pub(crate) fn fail(&self, error: TetherError) {
        self.lock_shared().failure = Some(error);
        let _ = self.transition(ServiceState::Starting, ServiceState::Failed);
    }

    pub(crate) fn set_handle(&self, handle: ProcessHandle) {
        self.lock_shared().handle = Some(handle);
    }

    /// Takes the backend handle, transferring teardown ownership to the
    /// caller. At most one caller ever receives it.
    pub(crate) fn take_handle(&self) -> Option<ProcessHandle> {
        self.lock_shared().handle.take()
    }

    pub(crate) fn set_endpoint(&self, endpoint: Endpoint) {
        self.lock_shared().endpoint = Some(endpoint);
    }
}

/// Authoritative identity → instance map with deduplicating acquisition.
///
/// All synchronization is per-instance apart from a short-held map lock;
/// no operation on one instance blocks operations on another.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<DescriptorId, Arc<ServiceInstance>>>,
    coordinator: Arc<LifecycleCoordinator>,
    closed: AtomicBool,
}

impl ServiceRegistry {
    /// Creates a registry supervised by the given coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            coordinator,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns an instance for the descriptor, starting one if needed.
    ///
    /// An existing Starting or Ready instance with the same identity is
    /// reused and its reference count incremented; a pending grace-period
    /// stop is canceled. Otherwise a fresh Starting instance is inserted
    /// and its startup spawned; concurrent callers for one identity
    /// trigger exactly one startup sequence.
    ///
    /// Must be called from within a Tokio runtime. The returned instance
    /// is typically awaited via [`ServiceInstance::wait_ready`].
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the registry has been shut down.
    pub fn acquire(self: &Arc<Self>, descriptor: &ServiceDescriptor) -> Result<Arc<ServiceInstance>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TetherError::Closed);
        }
        let identity = descriptor.identity();
        let mut services = self.lock_services();

        if let Some(existing) = services.get(&identity).cloned() {
            match existing.state() {
                ServiceState::Starting | ServiceState::Ready => {
                    let mut shared = existing.lock_shared();
                    shared.ref_count += 1;
                    // Cancels any stop still sitting out its grace period.
                    shared.stop_epoch += 1;
                    drop(shared);
                    tracing::debug!(identity = %identity, "reusing service instance");
                    return Ok(existing);
                }
                // Failed, Stopping, and Stopped entries are stale; retry
                // with a fresh instance.
                _ => {
                    let _ = services.remove(&identity);
                }
            }
        }

        let instance = Arc::new(ServiceInstance::new(identity.clone(), descriptor.clone()));
        let _ = services.insert(identity.clone(), Arc::clone(&instance));
        drop(services);

        tracing::info!(identity = %identity, image = descriptor.image(), "starting service instance");
        let registry = Arc::clone(self);
        let startup = Arc::clone(&instance);
        drop(tokio::spawn(async move {
            registry.run_startup(startup).await;
        }));
        Ok(instance)
    }

    /// Releases one reference to the instance.
    ///
    /// Saturating: releasing more times than acquired never underflows.
    /// When the count reaches zero the instance is scheduled for teardown
    /// after the configured grace period.
    pub fn release(self: &Arc<Self>, instance: &Arc<ServiceInstance>) {
        let remaining = {
            let mut shared = instance.lock_shared();
            shared.ref_count = shared.ref_count.saturating_sub(1);
            shared.ref_count
        };
        tracing::debug!(identity = %instance.identity(), remaining, "released service reference");
        if remaining == 0 {
            self.schedule_stop(instance);
        }
    }

    /// Returns the tracked instance for an identity, if any.
    #[must_use]
    pub fn lookup(&self, identity: &DescriptorId) -> Option<Arc<ServiceInstance>> {
        self.lock_services().get(identity).cloned()
    }

    /// Returns every tracked instance.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<ServiceInstance>> {
        self.lock_services().values().cloned().collect()
    }

    /// Returns the number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_services().len()
    }

    /// Returns whether the registry tracks no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_services().is_empty()
    }

    /// Stops every tracked instance and rejects further acquisitions.
    ///
    /// Teardown is best-effort; failures are logged and the instances are
    /// removed regardless.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let instances: Vec<Arc<ServiceInstance>> =
            self.lock_services().drain().map(|(_, inst)| inst).collect();
        tracing::info!(count = instances.len(), "shutting down service registry");
        for instance in instances {
            let claimed = instance.transition(ServiceState::Ready, ServiceState::Stopping)
                || instance.transition(ServiceState::Starting, ServiceState::Stopping);
            if claimed {
                self.coordinator.stop(&instance).await;
            }
        }
    }

    async fn run_startup(self: Arc<Self>, instance: Arc<ServiceInstance>) {
        match self.coordinator.start(&instance).await {
            Ok(()) => {
                // Every acquirer may have released (or canceled) while the
                // service was starting; begin the grace countdown if so.
                self.schedule_stop(&instance);
            }
            Err(error) => {
                tracing::warn!(
                    identity = %instance.identity(),
                    error = %error,
                    "service startup failed"
                );
                // Remove the entry so a later acquire retries fresh.
                self.remove_entry(&instance);
            }
        }
    }

    /// Schedules a grace-period stop if the instance is unreferenced.
    ///
    /// The stop only commits if no acquire bumps the epoch before the
    /// grace period elapses.
    fn schedule_stop(self: &Arc<Self>, instance: &Arc<ServiceInstance>) {
        let epoch = {
            let mut shared = instance.lock_shared();
            if shared.ref_count > 0 {
                return;
            }
            shared.stop_epoch += 1;
            shared.stop_epoch
        };
        if instance.state() != ServiceState::Ready {
            // Starting instances are handled when startup settles; Failed
            // and Stopping ones already have an owner for their teardown.
            return;
        }
        let grace = self.coordinator.config().stop_grace_period;
        tracing::debug!(identity = %instance.identity(), ?grace, "scheduling stop");
        let registry = Arc::clone(self);
        let target = Arc::clone(instance);
        drop(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.finish_stop(target, epoch).await;
        }));
    }

    /// Commit point for a grace-period stop.
    ///
    /// Re-checks reference count and epoch under the map and instance
    /// locks; exactly one committed stop per instance ever reaches the
    /// coordinator.
    async fn finish_stop(self: Arc<Self>, instance: Arc<ServiceInstance>, epoch: u64) {
        {
            let mut services = self.lock_services();
            let shared = instance.lock_shared();
            if shared.ref_count > 0 || shared.stop_epoch != epoch {
                return;
            }
            drop(shared);
            if !instance.transition(ServiceState::Ready, ServiceState::Stopping) {
                return;
            }
            if let Some(current) = services.get(instance.identity()) {
                if Arc::ptr_eq(current, &instance) {
                    let _ = services.remove(instance.identity());
                }
            }
        }
        self.coordinator.stop(&instance).await;
    }

    fn remove_entry(&self, instance: &Arc<ServiceInstance>) {
        let mut services = self.lock_services();
        if let Some(current) = services.get(instance.identity()) {
            if Arc::ptr_eq(current, instance) {
                let _ = services.remove(instance.identity());
            }
        }
    }

    fn lock_services(&self) -> MutexGuard<'_, HashMap<DescriptorId, Arc<ServiceInstance>>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
