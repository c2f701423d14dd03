//! Service-binding resolution and lifecycle management.
//!
//! Ephemeral containerized services are declared as immutable
//! [`descriptor::ServiceDescriptor`] values, deduplicated by content
//! identity in the [`registry::ServiceRegistry`], supervised through
//! startup/readiness/teardown by the [`lifecycle::LifecycleCoordinator`],
//! and exposed to dependent executions under stable names by the
//! [`binding::BindingResolver`].
//!
//! The container engine itself is an external collaborator behind the
//! [`runtime::ContainerRuntime`] trait; this crate owns only the
//! coordination above it.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod binding;
pub mod descriptor;
pub mod lifecycle;
pub mod probe;
pub mod registry;
pub mod runtime;
