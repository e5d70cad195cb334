//! Error types for the external seams.
//!
//! The reactive core itself never fails: programmer misuse, missing keys and
//! unchanged values are diagnostics or designed no-ops, not errors. The only
//! fallible surfaces are the two external contracts (storage backends and
//! render integrations), and failures crossing those seams are logged and
//! swallowed so they can never block mutation or notification.

use thiserror::Error;

/// Errors produced by external collaborators of the reactive core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The persistence backend failed to read or write a value.
    #[error("storage backend error: {0}")]
    Storage(String),

    /// The render integration failed to bind or update a component.
    #[error("render integration error: {0}")]
    Integration(String),
}
