//! Event Primitive
//!
//! An Event is a fire-and-forget signal. Unlike a State, triggering an event
//! always creates and submits a job: payloads are never deduplicated, so
//! triggering twice with the same payload invokes the callbacks twice.
//!
//! Callbacks live in an ordered registry keyed by generated (or caller
//! supplied) names and run during `perform`, with the triggering payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::context::Prism;
use crate::reactive::job::{Job, UpdateConfig};
use crate::reactive::observer::{ObserverBehavior, ObserverId};

type EventCallback = dyn Fn(&Prism, &Value) + Send + Sync;

struct EventCore {
    observer: ObserverId,
    callbacks: RwLock<IndexMap<String, Arc<EventCallback>>>,
    callback_counter: AtomicU64,
    uses: AtomicU64,
}

/// Behavior adapter: commits the payload and invokes the callbacks.
struct EventObserver {
    core: Arc<EventCore>,
}

impl ObserverBehavior for EventObserver {
    fn ingest(&self, _ctx: &Prism, _config: UpdateConfig) {
        // Events have no staged value to re-ingest; they only move through
        // explicit triggers.
        trace!(
            observer = self.core.observer.raw(),
            "ingest on event observer is a no-op"
        );
    }

    fn perform(&self, ctx: &Prism, job: &Job) {
        ctx.graph().commit(self.core.observer, job.value.clone());
        self.core.uses.fetch_add(1, Ordering::Relaxed);

        let callbacks: Vec<Arc<EventCallback>> = self
            .core
            .callbacks
            .read()
            .values()
            .map(Arc::clone)
            .collect();
        for callback in callbacks {
            callback(ctx, &job.value);
        }
    }
}

/// A fire-and-forget reactive signal.
#[derive(Clone)]
pub struct Event {
    ctx: Prism,
    core: Arc<EventCore>,
}

impl Event {
    /// Create an event.
    pub fn new(ctx: &Prism) -> Self {
        Self::build(ctx, None)
    }

    /// Create a keyed event.
    pub fn with_key(ctx: &Prism, key: &str) -> Self {
        Self::build(ctx, Some(key.to_string()))
    }

    fn build(ctx: &Prism, key: Option<String>) -> Self {
        let observer = ctx.graph().create_observer(key, Value::Null);
        let core = Arc::new(EventCore {
            observer,
            callbacks: RwLock::new(IndexMap::new()),
            callback_counter: AtomicU64::new(0),
            uses: AtomicU64::new(0),
        });
        ctx.graph().register_behavior(
            observer,
            Arc::new(EventObserver {
                core: Arc::clone(&core),
            }),
        );
        Self {
            ctx: ctx.clone(),
            core,
        }
    }

    /// The underlying observer id.
    pub fn observer(&self) -> ObserverId {
        self.core.observer
    }

    /// Register a callback; returns its generated registry key.
    pub fn on(&self, callback: impl Fn(&Prism, &Value) + Send + Sync + 'static) -> String {
        let key = format!(
            "callback-{}",
            self.core.callback_counter.fetch_add(1, Ordering::Relaxed)
        );
        self.on_keyed(&key, callback);
        key
    }

    /// Register a callback under an explicit registry key.
    pub fn on_keyed(
        &self,
        key: &str,
        callback: impl Fn(&Prism, &Value) + Send + Sync + 'static,
    ) -> &Self {
        self.core
            .callbacks
            .write()
            .insert(key.to_string(), Arc::new(callback));
        self
    }

    /// Remove a registered callback.
    pub fn off(&self, key: &str) -> &Self {
        self.core.callbacks.write().shift_remove(key);
        self
    }

    /// Trigger with default options.
    pub fn trigger(&self, payload: Value) -> &Self {
        self.trigger_with(payload, UpdateConfig::default())
    }

    /// Trigger with explicit options. Always submits a job; no payload
    /// deduplication.
    pub fn trigger_with(&self, payload: Value, config: UpdateConfig) -> &Self {
        let perform = config.perform;
        let job = Job::new(&self.ctx, self.core.observer, payload, config);
        self.ctx.runtime().ingest(&self.ctx, job, perform);
        self
    }

    /// The payload of the most recent trigger.
    pub fn payload(&self) -> Value {
        self.ctx.tracker().tracked(self.core.observer);
        self.ctx.graph().value(self.core.observer)
    }

    /// How many times the event has been performed.
    pub fn uses(&self) -> u64 {
        self.core.uses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("observer", &self.core.observer.raw())
            .field("uses", &self.uses())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn trigger_invokes_callbacks_with_payload() {
        let ctx = Prism::new();
        let event = ctx.event();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        event.on(move |_, payload| {
            seen_clone.lock().push(payload.clone());
        });

        event.trigger(json!("hello"));
        assert_eq!(seen.lock().as_slice(), &[json!("hello")]);
        assert_eq!(event.payload(), json!("hello"));
    }

    #[test]
    fn repeated_payloads_are_never_deduplicated() {
        let ctx = Prism::new();
        let event = ctx.event();

        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();
        event.on(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        event.trigger(json!(1));
        event.trigger(json!(1));
        event.trigger(json!(1));

        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(event.uses(), 3);
    }

    #[test]
    fn off_removes_a_callback() {
        let ctx = Prism::new();
        let event = ctx.event();

        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();
        let key = event.on(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        event.trigger(Value::Null);
        event.off(&key);
        event.trigger(Value::Null);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
