//! Unified error types for the Tether workspace.
//!
//! The enum is `Clone`: a single startup failure must be surfaced to every
//! acquirer waiting on the same service instance.

use thiserror::Error;

use crate::types::DescriptorId;

/// Top-level error type shared across the workspace.
#[derive(Debug, Clone, Error)]
pub enum TetherError {
    /// A service descriptor is structurally invalid.
    #[error("invalid descriptor: {message}")]
    InvalidDescriptor {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The container runtime failed to launch or address a service.
    #[error("launch failed for service {identity}: {message}")]
    Launch {
        /// Identity of the descriptor that failed to launch.
        identity: DescriptorId,
        /// Backend-reported failure description.
        message: String,
    },

    /// A starting service did not satisfy its readiness policy in time.
    #[error("service {identity} not ready after {waited_ms}ms")]
    ReadinessTimeout {
        /// Identity of the descriptor that timed out.
        identity: DescriptorId,
        /// Total time waited, in milliseconds.
        waited_ms: u64,
    },

    /// Resolution of a named binding failed.
    ///
    /// Carries the first failing binding in input order; all references
    /// acquired by the same resolution have already been released.
    #[error("binding '{name}' failed: {source}")]
    BindingFailed {
        /// Bound name that failed to resolve.
        name: String,
        /// Underlying failure.
        #[source]
        source: Box<TetherError>,
    },

    /// A blocking wait was aborted by caller-side cancellation.
    #[error("operation canceled")]
    Canceled,

    /// Teardown of a service failed.
    ///
    /// Non-fatal: the instance is still removed from the registry so no
    /// phantom entry is leaked.
    #[error("teardown failed for service {identity}: {message}")]
    TeardownError {
        /// Identity of the descriptor whose teardown failed.
        identity: DescriptorId,
        /// Backend-reported failure description.
        message: String,
    },

    /// The registry has been shut down; no new acquisitions are accepted.
    #[error("service registry is closed")]
    Closed,
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_failed_preserves_cause() {
        let id = DescriptorId::from_digest(&[0xab; 32]);
        let err = TetherError::BindingFailed {
            name: "www".into(),
            source: Box::new(TetherError::ReadinessTimeout {
                identity: id,
                waited_ms: 200,
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("www"), "got: {msg}");
        assert!(msg.contains("not ready"), "got: {msg}");
    }

    #[test]
    fn errors_are_cloneable() {
        let err = TetherError::Canceled;
        let copy = err.clone();
        assert_eq!(copy.to_string(), "operation canceled");
    }
}
