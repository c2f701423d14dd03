//! End-to-end tests for the service-binding core.
//!
//! These tests exercise the full pipeline against a mock container
//! runtime:
//! 1. Descriptor identity and registry deduplication
//! 2. Concurrent acquisition (at-most-one startup per fingerprint)
//! 3. Binding resolution with namespace injection
//! 4. Readiness timeouts and rollback on partial failure
//! 5. Grace-period teardown and rapid re-acquire
//! 6. Cancellation and registry shutdown

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use tether_common::config::LifecycleConfig;
use tether_common::error::{Result, TetherError};
use tether_common::types::{
    DescriptorId, Endpoint, ExposedPort, ProcessHandle, ScopeId, ServiceState,
};
use tether_core::binding::BindingResolver;
use tether_core::descriptor::{ReadinessPolicy, ServiceDescriptor};
use tether_core::lifecycle::LifecycleCoordinator;
use tether_core::probe::ReadinessProbe;
use tether_core::registry::ServiceRegistry;
use tether_core::runtime::{ContainerRuntime, InMemoryInjector, NamespaceInjector};

// ── Test doubles ─────────────────────────────────────────────────────

/// Mock engine: tracks launches and terminations, optionally failing
/// launches for one image or erroring on every terminate.
#[derive(Debug, Default)]
struct MockRuntime {
    launches: AtomicUsize,
    terminations: AtomicUsize,
    fail_image: Mutex<Option<String>>,
    terminate_error: AtomicBool,
    ports: Mutex<HashMap<ProcessHandle, u16>>,
}

impl MockRuntime {
    fn fail_launches_for(&self, image: &str) {
        *self
            .fail_image
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(image.to_string());
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn launch(&self, descriptor: &ServiceDescriptor) -> Result<ProcessHandle> {
        let failing = self
            .fail_image
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if failing.as_deref() == Some(descriptor.image()) {
            return Err(TetherError::Launch {
                identity: descriptor.identity(),
                message: "image unavailable".into(),
            });
        }
        let _ = self.launches.fetch_add(1, Ordering::SeqCst);
        let handle = ProcessHandle::generate();
        let port = descriptor.primary_port().map_or(0, |p| p.port);
        let _ = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone(), port);
        Ok(handle)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        let _ = self.terminations.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle);
        if self.terminate_error.load(Ordering::SeqCst) {
            return Err(TetherError::TeardownError {
                identity: DescriptorId::from_digest(&[0; 32]),
                message: "service already gone".into(),
            });
        }
        Ok(())
    }

    async fn network_address(&self, handle: &ProcessHandle) -> Result<Endpoint> {
        let port = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .copied()
            .unwrap_or(0);
        Ok(Endpoint::new("10.88.0.2", port))
    }
}

/// Probe that never reports ready.
#[derive(Debug)]
struct NeverReadyProbe;

#[async_trait]
impl ReadinessProbe for NeverReadyProbe {
    async fn check_ready(&self, _endpoint: &Endpoint) -> bool {
        false
    }
}

fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        readiness_timeout: Duration::from_millis(200),
        probe_initial_delay: Duration::from_millis(10),
        probe_max_delay: Duration::from_millis(50),
        probe_backoff_multiplier: 2.0,
        stop_grace_period: Duration::from_millis(30),
    }
}

type Harness = (Arc<ServiceRegistry>, BindingResolver, Arc<InMemoryInjector>);

fn harness(runtime: Arc<MockRuntime>) -> Harness {
    let coordinator = Arc::new(LifecycleCoordinator::new(runtime, fast_config()));
    build_harness(coordinator)
}

fn harness_with_probe(runtime: Arc<MockRuntime>, probe: Arc<dyn ReadinessProbe>) -> Harness {
    let coordinator = Arc::new(LifecycleCoordinator::with_probe(runtime, probe, fast_config()));
    build_harness(coordinator)
}

fn build_harness(coordinator: Arc<LifecycleCoordinator>) -> Harness {
    let registry = Arc::new(ServiceRegistry::new(coordinator));
    let injector = Arc::new(InMemoryInjector::new());
    let resolver = BindingResolver::new(
        Arc::clone(&registry),
        Arc::clone(&injector) as Arc<dyn NamespaceInjector>,
    );
    (registry, resolver, injector)
}

/// Descriptor that becomes ready after a short fixed delay.
fn service(tag: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(
        format!("file:///opt/images/{tag}"),
        vec!["./serve".into()],
        vec![],
        vec![ExposedPort::tcp(8080)],
        ReadinessPolicy::Delay(Duration::from_millis(5)),
    )
    .expect("valid descriptor")
}

/// Descriptor whose readiness is decided by the coordinator's probe.
fn probed_service(tag: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(
        format!("file:///opt/images/{tag}"),
        vec!["./serve".into()],
        vec![],
        vec![ExposedPort::tcp(8080)],
        ReadinessPolicy::Probe,
    )
    .expect("valid descriptor")
}

fn req(name: &str, descriptor: &ServiceDescriptor) -> (String, ServiceDescriptor) {
    (name.to_string(), descriptor.clone())
}

// ── Concurrent acquisition ───────────────────────────────────────────

#[tokio::test]
async fn concurrent_acquires_trigger_exactly_one_startup() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, _resolver, _injector) = harness(Arc::clone(&runtime));
    let descriptor = service("web");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let descriptor = descriptor.clone();
        tasks.push(tokio::spawn(async move {
            let instance = registry.acquire(&descriptor).expect("acquire");
            let endpoint = instance.wait_ready().await.expect("ready");
            (instance, endpoint)
        }));
    }

    let mut instances = Vec::new();
    for task in tasks {
        let (instance, endpoint) = task.await.expect("join");
        assert_eq!(endpoint, Endpoint::new("10.88.0.2", 8080));
        instances.push(instance);
    }

    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
    assert_eq!(instances[0].ref_count(), 8);
    assert_eq!(runtime.launches(), 1, "exactly one startup per fingerprint");
    assert_eq!(registry.len(), 1);
}

// ── Binding resolution ───────────────────────────────────────────────

#[tokio::test]
async fn resolve_injects_each_bound_name_into_the_scope() {
    let runtime = Arc::new(MockRuntime::default());
    let (_registry, resolver, injector) = harness(runtime);
    let scope = ScopeId::generate();

    let bindings = resolver
        .resolve(&scope, &[req("www", &service("web")), req("db", &service("postgres"))])
        .await
        .expect("resolve");

    assert_eq!(bindings.len(), 2);
    assert_eq!(
        injector.lookup(&scope, "www"),
        bindings.endpoint("www").cloned()
    );
    assert_eq!(
        injector.lookup(&scope, "db"),
        bindings.endpoint("db").cloned()
    );
    assert_eq!(injector.lookup(&scope, "cache"), None);
}

#[tokio::test]
async fn release_twice_does_not_double_decrement() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, resolver, injector) = harness(Arc::clone(&runtime));
    let scope = ScopeId::generate();
    let descriptor = service("web");

    let mut bindings = resolver
        .resolve(&scope, &[req("www", &descriptor)])
        .await
        .expect("resolve");
    let instance = registry
        .lookup(&descriptor.identity())
        .expect("tracked instance");

    resolver.release(&mut bindings).await;
    resolver.release(&mut bindings).await;

    assert_eq!(instance.ref_count(), 0);
    assert_eq!(injector.scope_len(&scope), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(instance.state(), ServiceState::Stopped);
    assert_eq!(runtime.terminations(), 1, "single teardown despite double release");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn refcount_tracks_outstanding_bindings() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, resolver, _injector) = harness(runtime);
    let descriptor = service("web");

    let mut first = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await
        .expect("resolve first");
    let mut second = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await
        .expect("resolve second");

    let instance = registry
        .lookup(&descriptor.identity())
        .expect("tracked instance");
    assert_eq!(instance.ref_count(), 2);

    resolver.release(&mut first).await;
    assert_eq!(instance.ref_count(), 1);

    resolver.release(&mut second).await;
    assert_eq!(instance.ref_count(), 0);
}

// ── Readiness failure ────────────────────────────────────────────────

#[tokio::test]
async fn never_ready_service_fails_binding_within_timeout() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, resolver, _injector) =
        harness_with_probe(Arc::clone(&runtime), Arc::new(NeverReadyProbe));
    let descriptor = probed_service("web");

    let started = Instant::now();
    let result = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await;
    let elapsed = started.elapsed();

    let error = result.expect_err("binding must fail");
    match error {
        TetherError::BindingFailed { name, source } => {
            assert_eq!(name, "www");
            assert!(
                matches!(*source, TetherError::ReadinessTimeout { .. }),
                "got: {source}"
            );
        }
        other => panic!("expected BindingFailed, got: {other}"),
    }
    assert!(
        elapsed >= Duration::from_millis(150) && elapsed < Duration::from_secs(1),
        "timeout should fire near the configured 200ms, took {elapsed:?}"
    );

    // Failed instance is removed so a later acquire retries fresh (the
    // startup task finishes the removal just after waiters are notified).
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.lookup(&descriptor.identity()).is_none());
    assert_eq!(runtime.terminations(), 1, "launched process reclaimed");
}

#[tokio::test]
async fn failing_middle_binding_rolls_back_earlier_ones() {
    let runtime = Arc::new(MockRuntime::default());
    runtime.fail_launches_for("file:///opt/images/broken");
    let (registry, resolver, injector) = harness(Arc::clone(&runtime));
    let scope = ScopeId::generate();

    let first = service("web");
    let second = service("broken");
    let third = service("postgres");

    let result = resolver
        .resolve(
            &scope,
            &[req("a", &first), req("b", &second), req("c", &third)],
        )
        .await;

    let error = result.expect_err("resolution must fail");
    match error {
        TetherError::BindingFailed { name, source } => {
            assert_eq!(name, "b", "first failing binding in input order");
            assert!(matches!(*source, TetherError::Launch { .. }), "got: {source}");
        }
        other => panic!("expected BindingFailed, got: {other}"),
    }

    // The first binding's reference was released before the error returned.
    if let Some(instance) = registry.lookup(&first.identity()) {
        assert_eq!(instance.ref_count(), 0, "no dangling reference");
    }
    // The third binding was never attempted.
    assert!(registry.lookup(&third.identity()).is_none());
    // Nothing was injected.
    assert_eq!(injector.scope_len(&scope), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(registry.is_empty(), "rolled-back services are torn down");
}

// ── Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn canceled_resolution_releases_partial_references() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, resolver, _injector) = harness_with_probe(
        Arc::clone(&runtime),
        Arc::new(NeverReadyProbe),
    );
    let descriptor = probed_service("slow");
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    let resolver = Arc::new(resolver);
    let resolver_task = Arc::clone(&resolver);
    let descriptor_task = descriptor.clone();
    let resolution = tokio::spawn(async move {
        resolver_task
            .resolve_with_cancel(
                &ScopeId::generate(),
                &[("www".to_string(), descriptor_task)],
                cancel_rx,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    cancel_tx.send(true).expect("send cancel");

    let result = resolution.await.expect("join");
    assert!(matches!(result, Err(TetherError::Canceled)), "got: {result:?}");

    let instance = registry
        .lookup(&descriptor.identity())
        .expect("still starting in background");
    assert_eq!(instance.ref_count(), 0, "canceled wait released its reference");
}

// ── Grace period ─────────────────────────────────────────────────────

#[tokio::test]
async fn reacquire_within_grace_period_reuses_instance() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, resolver, _injector) = harness(Arc::clone(&runtime));
    let descriptor = service("web");

    let mut first = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await
        .expect("resolve first");
    let mut second = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await
        .expect("resolve second");

    resolver.release(&mut first).await;
    resolver.release(&mut second).await;

    // Third execution binds within the grace period.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let mut third = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await
        .expect("resolve third");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let instance = registry
        .lookup(&descriptor.identity())
        .expect("instance survived the grace period");
    assert_eq!(instance.state(), ServiceState::Ready);
    assert_eq!(runtime.launches(), 1, "no restart churn");
    assert_eq!(runtime.terminations(), 0);

    resolver.release(&mut third).await;
}

// ── Teardown ─────────────────────────────────────────────────────────

#[tokio::test]
async fn teardown_error_is_nonfatal_and_removes_instance() {
    let runtime = Arc::new(MockRuntime::default());
    runtime.terminate_error.store(true, Ordering::SeqCst);
    let (registry, resolver, _injector) = harness(Arc::clone(&runtime));
    let descriptor = service("web");

    let mut bindings = resolver
        .resolve(&ScopeId::generate(), &[req("www", &descriptor)])
        .await
        .expect("resolve");
    let instance = registry
        .lookup(&descriptor.identity())
        .expect("tracked instance");

    resolver.release(&mut bindings).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(instance.state(), ServiceState::Stopped);
    assert!(registry.is_empty(), "no phantom entry despite teardown error");
}

#[tokio::test]
async fn shutdown_stops_all_tracked_services() {
    let runtime = Arc::new(MockRuntime::default());
    let (registry, resolver, _injector) = harness(Arc::clone(&runtime));

    let web = service("web");
    let db = service("postgres");
    let _bindings = resolver
        .resolve(
            &ScopeId::generate(),
            &[req("www", &web), req("db", &db)],
        )
        .await
        .expect("resolve");

    let web_instance = registry.lookup(&web.identity()).expect("web tracked");
    let db_instance = registry.lookup(&db.identity()).expect("db tracked");

    registry.shutdown().await;

    assert!(registry.is_empty());
    assert_eq!(web_instance.state(), ServiceState::Stopped);
    assert_eq!(db_instance.state(), ServiceState::Stopped);
    assert_eq!(runtime.terminations(), 2);
    assert!(matches!(
        registry.acquire(&web),
        Err(TetherError::Closed)
    ));
}
