//! Integration tests for service-binding operations.
//!
//! These tests are implemented in:
//! `crates/tether-core/tests/binding_e2e_test.rs`
//!
//! Covered scenarios:
//! - `concurrent_acquires_trigger_exactly_one_startup`: N concurrent acquirers share one instance
//! - `resolve_injects_each_bound_name_into_the_scope`: Names resolve to endpoints per scope
//! - `release_twice_does_not_double_decrement`: Idempotent release
//! - `refcount_tracks_outstanding_bindings`: Reference count invariant
//! - `never_ready_service_fails_binding_within_timeout`: Readiness timeout surfaces as BindingFailed
//! - `failing_middle_binding_rolls_back_earlier_ones`: No partial application
//! - `canceled_resolution_releases_partial_references`: Cancel path
//! - `reacquire_within_grace_period_reuses_instance`: No restart churn
//! - `teardown_error_is_nonfatal_and_removes_instance`: Best-effort teardown
//! - `shutdown_stops_all_tracked_services`: Explicit session teardown
