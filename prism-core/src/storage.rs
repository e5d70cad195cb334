//! Persistence Backend Contract
//!
//! Persistence is an opaque get/set/remove key-value contract. The core calls
//! `get` exactly once when a state is marked persistent (to load a previously
//! stored value) and `set` on every committed change whose job allows storage
//! side effects. Calls are fire-and-forget relative to the reactive graph:
//! backend failures are logged and can never block mutation or notification.

use serde_json::Value;

use crate::error::CoreError;

/// Key-value persistence backend consumed by persistent states.
pub trait StorageBackend: Send + Sync {
    /// Load a previously stored value, if any.
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError>;

    /// Store a value under the given key.
    fn set(&self, key: &str, value: &Value) -> Result<(), CoreError>;

    /// Remove a stored value.
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}
