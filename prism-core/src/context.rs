//! Prism Context
//!
//! A [`Prism`] is the explicit top-level context every primitive is created
//! against. It owns the observer graph, the job scheduler, the subscription
//! controller and the dependency tracker, plus the optional external
//! adapters (render integration, storage backend).
//!
//! There are no process-wide singletons: the context is an ordinary value,
//! and multiple independent contexts coexist in one process. Handles clone
//! cheaply and share the same underlying engine.
//!
//! # Flushing
//!
//! Mutations drain synchronously, but notifications are deferred: call
//! [`Prism::flush`] at the end of a logical action to deliver every
//! coalesced notification in a single pass.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

use crate::collection::{Collection, CollectionConfig};
use crate::computed::Computed;
use crate::event::Event;
use crate::integration::RenderIntegration;
use crate::reactive::observer::ObserverGraph;
use crate::reactive::runtime::Runtime;
use crate::reactive::subscription::SubController;
use crate::reactive::tracker::DependencyTracker;
use crate::state::State;
use crate::storage::StorageBackend;

struct Shared {
    graph: ObserverGraph,
    runtime: Runtime,
    subs: SubController,
    tracker: DependencyTracker,
    integration: RwLock<Option<Arc<dyn RenderIntegration>>>,
    storage: RwLock<Option<Arc<dyn StorageBackend>>>,
}

/// The top-level reactive context.
#[derive(Clone)]
pub struct Prism {
    shared: Arc<Shared>,
}

impl Prism {
    /// Create a fresh context with no registered adapters.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                graph: ObserverGraph::new(),
                runtime: Runtime::new(),
                subs: SubController::new(),
                tracker: DependencyTracker::new(),
                integration: RwLock::new(None),
                storage: RwLock::new(None),
            }),
        }
    }

    /// The observer graph arena.
    pub fn graph(&self) -> &ObserverGraph {
        &self.shared.graph
    }

    /// The job scheduler.
    pub fn runtime(&self) -> &Runtime {
        &self.shared.runtime
    }

    /// The subscription controller.
    pub fn sub_controller(&self) -> &SubController {
        &self.shared.subs
    }

    /// The dependency tracker.
    pub fn tracker(&self) -> &DependencyTracker {
        &self.shared.tracker
    }

    /// Register the render integration adapter.
    ///
    /// Jobs created while no integration is registered never cause a
    /// rerender, so registration should happen before mutation begins.
    pub fn register_integration(&self, integration: Arc<dyn RenderIntegration>) {
        info!(integration = integration.key(), "registered render integration");
        *self.shared.integration.write() = Some(integration);
    }

    /// The registered render integration, if any.
    pub fn integration(&self) -> Option<Arc<dyn RenderIntegration>> {
        self.shared.integration.read().clone()
    }

    /// Whether a render integration is registered.
    pub fn has_integration(&self) -> bool {
        self.shared.integration.read().is_some()
    }

    /// Register the persistence backend.
    pub fn register_storage(&self, storage: Arc<dyn StorageBackend>) {
        info!("registered storage backend");
        *self.shared.storage.write() = Some(storage);
    }

    /// The registered storage backend, if any.
    pub fn storage(&self) -> Option<Arc<dyn StorageBackend>> {
        self.shared.storage.read().clone()
    }

    /// Whether a storage backend is registered.
    pub fn has_storage(&self) -> bool {
        self.shared.storage.read().is_some()
    }

    /// Deliver every coalesced pending notification in a single pass.
    pub fn flush(&self) {
        self.shared.runtime.flush(self);
    }

    // ------------------------------------------------------------------
    // Factory helpers
    // ------------------------------------------------------------------

    /// Create a [`State`] holding the given initial value.
    pub fn state(&self, initial: Value) -> State {
        State::new(self, initial)
    }

    /// Create a keyed [`State`].
    pub fn state_with_key(&self, key: &str, initial: Value) -> State {
        State::with_key(self, key, initial)
    }

    /// Create a [`Computed`] deriving its value from tracked reads.
    pub fn computed<F>(&self, compute: F) -> Computed
    where
        F: Fn(&Prism) -> Value + Send + Sync + 'static,
    {
        Computed::new(self, compute)
    }

    /// Create an [`Event`].
    pub fn event(&self) -> Event {
        Event::new(self)
    }

    /// Create a [`Collection`] with default configuration.
    pub fn collection(&self) -> Collection {
        Collection::new(self)
    }

    /// Create a [`Collection`] with explicit configuration.
    pub fn collection_with_config(&self, config: CollectionConfig) -> Collection {
        Collection::with_config(self, config)
    }
}

impl Default for Prism {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Prism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prism")
            .field("observers", &self.shared.graph.observer_count())
            .field("containers", &self.shared.subs.container_count())
            .field("queued_jobs", &self.shared.runtime.queued_jobs())
            .field("has_integration", &self.has_integration())
            .field("has_storage", &self.has_storage())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
