//! # tether-sdk
//!
//! Public SDK for using Tether as a Rust library.
//!
//! Provides two main entry points:
//! - [`ServiceBuilder`](builder::ServiceBuilder): Fluent API for describing
//!   a dependency service.
//! - [`Session`](session::Session): Explicit process-wide context that owns
//!   the registry and resolver, with explicit teardown via
//!   [`close`](session::Session::close).
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_sdk::builder::ServiceBuilder;
//!
//! let http_srv = ServiceBuilder::new("file:///opt/images/python")
//!     .command(vec!["python".into(), "-m".into(), "http.server".into(), "8080".into()])
//!     .expose_tcp(8080)
//!     .build();
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod session;
