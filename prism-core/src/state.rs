//! State Primitive
//!
//! A State wraps one observer and gives it value-mutation semantics: staged
//! next value, deep-equality short-circuit, previous-value history, and an
//! ordered registry of named side-effect slots that run when a job commits.
//!
//! # The Equality Short-Circuit
//!
//! `ingest_value` with a value deep-equal to the current one (and no `force`)
//! is a designed no-op: no job is created and no notification occurs. This is
//! a correctness property, not an optimization; it is what stops a cyclic
//! computed graph from recomputing forever.
//!
//! # Side-Effect Slots
//!
//! Side effects are named callbacks run in registration order during
//! `perform`, after the value commits. They may mutate other states;
//! re-entrant ingestion is drained by the scheduler before the outermost
//! call returns. Groups, selectors and persistence are all wired through
//! these slots.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::context::Prism;
use crate::reactive::job::{Job, UpdateConfig};
use crate::reactive::observer::{ObserverBehavior, ObserverId};

/// Named side-effect callback, invoked after a job commits.
pub type SideEffectFn = dyn Fn(&Prism, &UpdateConfig) + Send + Sync;

/// Shared core of a State: staged value plus the side-effect registry.
pub(crate) struct StateCore {
    pub(crate) observer: ObserverId,
    next_value: RwLock<Value>,
    side_effects: RwLock<IndexMap<String, Arc<SideEffectFn>>>,
    persist_key: RwLock<Option<String>>,
}

impl StateCore {
    pub(crate) fn new(observer: ObserverId, initial: Value) -> Arc<Self> {
        Arc::new(Self {
            observer,
            next_value: RwLock::new(initial),
            side_effects: RwLock::new(IndexMap::new()),
            persist_key: RwLock::new(None),
        })
    }

    /// Stage a new value and submit a job, unless the value is deep-equal to
    /// the current one and `force` is not set.
    pub(crate) fn ingest_value(&self, ctx: &Prism, new_value: Value, config: UpdateConfig) {
        let current = ctx.graph().value(self.observer);
        if new_value == current && !config.force {
            trace!(
                observer = self.observer.raw(),
                "value unchanged; skipping job creation"
            );
            return;
        }

        *self.next_value.write() = new_value.clone();
        let perform = config.perform;
        let job = Job::new(ctx, self.observer, new_value, config);
        ctx.runtime().ingest(ctx, job, perform);
    }

    /// Re-ingest the currently staged next value.
    pub(crate) fn ingest(&self, ctx: &Prism, config: UpdateConfig) {
        let next = self.next_value.read().clone();
        self.ingest_value(ctx, next, config);
    }

    /// Commit a job's value and run the side-effect slots in order.
    pub(crate) fn perform_commit(&self, ctx: &Prism, job: &Job) {
        ctx.graph().commit(self.observer, job.value.clone());
        *self.next_value.write() = job.value.clone();

        if job.config.side_effects {
            // Clone the slots out so no lock is held while they run; side
            // effects may re-enter the registry or the scheduler.
            let effects: Vec<(String, Arc<SideEffectFn>)> = self
                .side_effects
                .read()
                .iter()
                .map(|(name, cb)| (name.clone(), Arc::clone(cb)))
                .collect();
            for (name, effect) in effects {
                trace!(observer = self.observer.raw(), side_effect = %name, "running side effect");
                effect(ctx, &job.config);
            }
        }
    }

    pub(crate) fn add_side_effect(
        &self,
        name: &str,
        effect: impl Fn(&Prism, &UpdateConfig) + Send + Sync + 'static,
    ) {
        let replaced = self
            .side_effects
            .write()
            .insert(name.to_string(), Arc::new(effect));
        if replaced.is_some() {
            warn!(side_effect = name, "replacing existing side effect slot");
        }
    }

    pub(crate) fn remove_side_effect(&self, name: &str) {
        self.side_effects.write().shift_remove(name);
    }

    pub(crate) fn has_side_effect(&self, name: &str) -> bool {
        self.side_effects.read().contains_key(name)
    }
}

/// Behavior adapter submitting the core's staged value to the scheduler.
pub(crate) struct StateObserver {
    pub(crate) core: Arc<StateCore>,
}

impl ObserverBehavior for StateObserver {
    fn ingest(&self, ctx: &Prism, config: UpdateConfig) {
        self.core.ingest(ctx, config);
    }

    fn perform(&self, ctx: &Prism, job: &Job) {
        self.core.perform_commit(ctx, job);
    }
}

/// A reactive piece of state.
///
/// Handles clone cheaply and share one core.
#[derive(Clone)]
pub struct State {
    ctx: Prism,
    core: Arc<StateCore>,
}

impl State {
    /// Create a state holding `initial`.
    pub fn new(ctx: &Prism, initial: Value) -> Self {
        Self::build(ctx, None, initial)
    }

    /// Create a keyed state.
    pub fn with_key(ctx: &Prism, key: &str, initial: Value) -> Self {
        Self::build(ctx, Some(key.to_string()), initial)
    }

    fn build(ctx: &Prism, key: Option<String>, initial: Value) -> Self {
        let observer = ctx.graph().create_observer(key, initial.clone());
        let core = StateCore::new(observer, initial);
        ctx.graph().register_behavior(
            observer,
            Arc::new(StateObserver {
                core: Arc::clone(&core),
            }),
        );
        Self {
            ctx: ctx.clone(),
            core,
        }
    }

    /// Wrap an existing core (used by derived primitives).
    pub(crate) fn from_core(ctx: &Prism, core: Arc<StateCore>) -> Self {
        Self {
            ctx: ctx.clone(),
            core,
        }
    }

    pub(crate) fn core(&self) -> &Arc<StateCore> {
        &self.core
    }

    /// The underlying observer id that adapters subscribe through.
    pub fn observer(&self) -> ObserverId {
        self.core.observer
    }

    /// The state's key, if any.
    pub fn key(&self) -> Option<String> {
        self.ctx.graph().key_of(self.core.observer)
    }

    /// Rename the state.
    pub fn set_key(&self, key: &str) -> &Self {
        self.ctx
            .graph()
            .set_key(self.core.observer, Some(key.to_string()));
        self
    }

    /// The current value. Reading inside a tracked evaluation registers this
    /// state as a dependency.
    pub fn value(&self) -> Value {
        self.ctx.tracker().tracked(self.core.observer);
        self.ctx.graph().value(self.core.observer)
    }

    /// The current value, without dependency tracking.
    pub fn raw_value(&self) -> Value {
        self.ctx.graph().value(self.core.observer)
    }

    /// The value before the latest commit.
    pub fn previous_value(&self) -> Value {
        self.ctx.graph().previous_value(self.core.observer)
    }

    /// Deserialize the current value into a concrete type.
    pub fn value_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.value()).ok()
    }

    /// Whether the state holds a non-null value.
    pub fn exists(&self) -> bool {
        !self.raw_value().is_null()
    }

    /// Set a new value with default options.
    pub fn set(&self, value: Value) -> &Self {
        self.set_with(value, UpdateConfig::default())
    }

    /// Set a new value with explicit options.
    pub fn set_with(&self, value: Value, config: UpdateConfig) -> &Self {
        self.core.ingest_value(&self.ctx, value, config);
        self
    }

    /// Serialize any value into the state.
    pub fn set_from(&self, value: impl Serialize) -> &Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.set(value);
            }
            Err(err) => warn!(%err, "could not serialize value; ignoring set"),
        }
        self
    }

    /// Re-submit the staged next value.
    pub fn ingest(&self, config: UpdateConfig) -> &Self {
        self.core.ingest(&self.ctx, config);
        self
    }

    /// Shallow-merge an object of changes into the current object value.
    ///
    /// Both the current value and `changes` must be objects; anything else
    /// is a no-op with a warning.
    pub fn patch(&self, changes: Value) -> &Self {
        self.patch_with(changes, UpdateConfig::default())
    }

    /// [`State::patch`] with explicit options.
    pub fn patch_with(&self, changes: Value, config: UpdateConfig) -> &Self {
        let current = self.raw_value();
        let (Value::Object(mut base), Value::Object(changes)) = (current, changes) else {
            warn!(
                observer = self.core.observer.raw(),
                "patch requires object values; ignoring"
            );
            return self;
        };
        for (key, value) in changes {
            base.insert(key, value);
        }
        self.core
            .ingest_value(&self.ctx, Value::Object(base), config);
        self
    }

    /// Revert to the previous value.
    pub fn undo(&self) -> &Self {
        self.undo_with(UpdateConfig::default())
    }

    /// [`State::undo`] with explicit options.
    pub fn undo_with(&self, config: UpdateConfig) -> &Self {
        let previous = self.previous_value();
        self.core.ingest_value(&self.ctx, previous, config);
        self
    }

    /// Register a named side-effect slot, replacing any slot with the same
    /// name.
    pub fn add_side_effect(
        &self,
        name: &str,
        effect: impl Fn(&Prism, &UpdateConfig) + Send + Sync + 'static,
    ) -> &Self {
        self.core.add_side_effect(name, effect);
        self
    }

    /// Remove a named side-effect slot.
    pub fn remove_side_effect(&self, name: &str) -> &Self {
        self.core.remove_side_effect(name);
        self
    }

    /// Whether a side-effect slot with this name is registered.
    pub fn has_side_effect(&self, name: &str) -> bool {
        self.core.has_side_effect(name)
    }

    /// Observe committed values under a named watcher slot.
    pub fn watch(&self, key: &str, callback: impl Fn(&Value) + Send + Sync + 'static) -> &Self {
        let observer = self.core.observer;
        self.core
            .add_side_effect(&format!("watcher-{key}"), move |ctx, _config| {
                callback(&ctx.graph().value(observer));
            });
        self
    }

    /// Remove a named watcher.
    pub fn remove_watcher(&self, key: &str) -> &Self {
        self.core.remove_side_effect(&format!("watcher-{key}"));
        self
    }

    /// Persist this state under `key` in the registered storage backend.
    ///
    /// Loads a previously stored value once, then writes every committed
    /// change whose job allows storage. Without a backend this is an
    /// informational no-op.
    pub fn persist(&self, key: &str) -> &Self {
        let Some(storage) = self.ctx.storage() else {
            info!(key, "no storage backend registered; persist is a no-op");
            return self;
        };

        *self.core.persist_key.write() = Some(key.to_string());

        match storage.get(key) {
            Ok(Some(stored)) => {
                debug!(key, "loaded persisted value");
                // Loading must not immediately write the value back.
                self.core.ingest_value(
                    &self.ctx,
                    stored,
                    UpdateConfig {
                        storage: false,
                        ..UpdateConfig::default()
                    },
                );
            }
            Ok(None) => {
                if let Err(err) = storage.set(key, &self.raw_value()) {
                    error!(key, %err, "could not store initial value");
                }
            }
            Err(err) => error!(key, %err, "could not load persisted value"),
        }

        let observer = self.core.observer;
        let persist_key = key.to_string();
        self.core.add_side_effect("persist", move |ctx, config| {
            if !config.storage {
                return;
            }
            let Some(storage) = ctx.storage() else {
                return;
            };
            if let Err(err) = storage.set(&persist_key, &ctx.graph().value(observer)) {
                error!(key = %persist_key, %err, "could not persist committed value");
            }
        });
        self
    }

    /// Remove the persisted value and stop persisting.
    pub fn delete_persisted(&self) -> &Self {
        let key = self.core.persist_key.write().take();
        if let (Some(storage), Some(key)) = (self.ctx.storage(), key) {
            if let Err(err) = storage.remove(&key) {
                error!(%key, %err, "could not remove persisted value");
            }
        }
        self.core.remove_side_effect("persist");
        self
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("observer", &self.core.observer.raw())
            .field("key", &self.key())
            .field("value", &self.raw_value())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
