//! Observer Graph
//!
//! Observers are the nodes of the dependency graph. Each one wraps a cached
//! value plus three adjacency sets:
//!
//! - `deps`: observers this observer depends on
//! - `dependents`: observers that depend on this observer (reverse edges)
//! - `subs`: subscription containers interested in this observer
//!
//! # Arena Layout
//!
//! Nodes live in a single table keyed by [`ObserverId`] rather than pointing
//! at each other directly. This keeps ownership acyclic: edges are plain ids,
//! and tearing a node down only requires detaching ids from neighboring sets.
//!
//! # Behavior Dispatch
//!
//! What it means to "perform" a job differs per observer flavor (state
//! commit, computed recompute, event trigger). Concrete flavors register an
//! [`ObserverBehavior`] for their observer id; the scheduler looks it up and
//! calls out with no graph lock held. An observer without a registered
//! behavior is the abstract base: performing it is a programmer error,
//! reported as a warning and treated as a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::warn;

use super::job::{Job, UpdateConfig};
use super::subscription::ContainerId;
use crate::context::Prism;

/// Unique identifier for an observer in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Flavor-specific observer behavior, registered per observer id.
///
/// `ingest` stages a fresh value and submits a job (for states this reads the
/// staged next value, for computeds it re-runs the compute function).
/// `perform` applies one job's value to the observer.
pub trait ObserverBehavior: Send + Sync {
    /// Stage the observer's next value and submit a job to the scheduler.
    fn ingest(&self, ctx: &Prism, config: UpdateConfig);

    /// Apply one job's value to the observer.
    fn perform(&self, ctx: &Prism, job: &Job);
}

/// One node in the dependency graph.
struct ObserverNode {
    key: Option<String>,
    value: Value,
    previous: Value,
    deps: IndexSet<ObserverId>,
    dependents: IndexSet<ObserverId>,
    subs: IndexSet<ContainerId>,
}

/// The observer arena: nodes, adjacency sets and behavior dispatch.
pub struct ObserverGraph {
    nodes: RwLock<IndexMap<ObserverId, ObserverNode>>,
    behaviors: RwLock<IndexMap<ObserverId, Arc<dyn ObserverBehavior>>>,
}

impl ObserverGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(IndexMap::new()),
            behaviors: RwLock::new(IndexMap::new()),
        }
    }

    /// Create a new observer with an initial cached value.
    pub fn create_observer(&self, key: Option<String>, initial: Value) -> ObserverId {
        let id = ObserverId::new();
        self.nodes.write().insert(
            id,
            ObserverNode {
                key,
                previous: Value::Null,
                value: initial,
                deps: IndexSet::new(),
                dependents: IndexSet::new(),
                subs: IndexSet::new(),
            },
        );
        id
    }

    /// Register the flavor-specific behavior for an observer.
    pub fn register_behavior(&self, id: ObserverId, behavior: Arc<dyn ObserverBehavior>) {
        self.behaviors.write().insert(id, behavior);
    }

    /// Look up the behavior for an observer, if one is registered.
    pub fn behavior(&self, id: ObserverId) -> Option<Arc<dyn ObserverBehavior>> {
        self.behaviors.read().get(&id).cloned()
    }

    /// Dispatch a job to the observer's behavior.
    ///
    /// An observer without a behavior is the abstract base observer;
    /// performing it directly is a programmer error and becomes a no-op.
    pub fn perform(&self, ctx: &Prism, job: &Job) {
        // Clone the Arc and release the lock before calling out; the behavior
        // may re-enter the graph.
        let behavior = self.behavior(job.observer);
        match behavior {
            Some(behavior) => behavior.perform(ctx, job),
            None => warn!(
                observer = job.observer.raw(),
                "perform called on a base observer without behavior; ignoring"
            ),
        }
    }

    /// Remove an observer and detach every edge that references it.
    pub fn remove_observer(&self, id: ObserverId) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.shift_remove(&id) {
            for dep in &node.deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.shift_remove(&id);
                }
            }
            for dependent in &node.dependents {
                if let Some(dependent_node) = nodes.get_mut(dependent) {
                    dependent_node.deps.shift_remove(&id);
                }
            }
        }
        drop(nodes);
        self.behaviors.write().shift_remove(&id);
    }

    /// Get the observer's cached value.
    ///
    /// A missing observer reads as `Null`.
    pub fn value(&self, id: ObserverId) -> Value {
        self.nodes
            .read()
            .get(&id)
            .map(|node| node.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Get the value the observer held before its latest commit.
    pub fn previous_value(&self, id: ObserverId) -> Value {
        self.nodes
            .read()
            .get(&id)
            .map(|node| node.previous.clone())
            .unwrap_or(Value::Null)
    }

    /// Get the observer's key, if it has one.
    pub fn key_of(&self, id: ObserverId) -> Option<String> {
        self.nodes.read().get(&id).and_then(|node| node.key.clone())
    }

    /// Rename an observer.
    pub fn set_key(&self, id: ObserverId, key: Option<String>) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.key = key;
        }
    }

    /// Commit a new cached value, shifting the old one into `previous`.
    pub fn commit(&self, id: ObserverId, value: Value) {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&id) {
            Some(node) => {
                node.previous = std::mem::replace(&mut node.value, value);
            }
            None => warn!(observer = id.raw(), "commit on unknown observer; ignoring"),
        }
    }

    /// Record that `id` depends on `on`.
    ///
    /// Idempotent; self-edges and edges to unknown observers are ignored.
    pub fn depend(&self, id: ObserverId, on: ObserverId) {
        if id == on {
            return;
        }
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&id) || !nodes.contains_key(&on) {
            return;
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.deps.insert(on);
        }
        if let Some(node) = nodes.get_mut(&on) {
            node.dependents.insert(id);
        }
    }

    /// Remove the dependency of `id` on `on`. Idempotent.
    pub fn undepend(&self, id: ObserverId, on: ObserverId) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(&id) {
            node.deps.shift_remove(&on);
        }
        if let Some(node) = nodes.get_mut(&on) {
            node.dependents.shift_remove(&id);
        }
    }

    /// The observers `id` currently depends on.
    pub fn deps_of(&self, id: ObserverId) -> IndexSet<ObserverId> {
        self.nodes
            .read()
            .get(&id)
            .map(|node| node.deps.clone())
            .unwrap_or_default()
    }

    /// The observers that depend on `id`, in subscription order.
    pub fn dependents_of(&self, id: ObserverId) -> SmallVec<[ObserverId; 8]> {
        self.nodes
            .read()
            .get(&id)
            .map(|node| node.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Attach a subscription container to an observer. Idempotent.
    pub fn subscribe(&self, id: ObserverId, container: ContainerId) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.subs.insert(container);
        }
    }

    /// Detach a subscription container from an observer. Idempotent.
    pub fn unsubscribe(&self, id: ObserverId, container: ContainerId) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.subs.shift_remove(&container);
        }
    }

    /// The containers currently subscribed to an observer.
    pub fn subscribed_containers(&self, id: ObserverId) -> IndexSet<ContainerId> {
        self.nodes
            .read()
            .get(&id)
            .map(|node| node.subs.clone())
            .unwrap_or_default()
    }

    /// Number of containers subscribed to an observer.
    pub fn subscriber_count(&self, id: ObserverId) -> usize {
        self.nodes
            .read()
            .get(&id)
            .map(|node| node.subs.len())
            .unwrap_or(0)
    }

    /// Whether an observer exists in the arena.
    pub fn contains(&self, id: ObserverId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// Total number of observers in the arena.
    pub fn observer_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl Default for ObserverGraph {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
