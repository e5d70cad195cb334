//! Computed Primitive
//!
//! A Computed is a State whose value is derived by re-running a function
//! over its inputs. Dependencies are discovered, not declared: the compute
//! function runs inside a tracking session, and whatever it actually reads
//! becomes its dependency set for the next round.
//!
//! # Dependency Deltas
//!
//! After every evaluation the freshly discovered set is diffed against the
//! previously subscribed one and exactly the delta is applied. A computed
//! that stops reading an input genuinely stops reacting to it, even when the
//! read set changes between evaluations.
//!
//! # Cycles
//!
//! There is no cycle detection. A cyclic computed graph recomputes until its
//! values stabilize: the equality short-circuit in the state core refuses to
//! create a job for an unchanged recomputed value, which is what terminates
//! the loop.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::Prism;
use crate::reactive::job::{Job, UpdateConfig};
use crate::reactive::observer::{ObserverBehavior, ObserverId};
use crate::state::StateCore;

type ComputeFn = dyn Fn(&Prism) -> Value + Send + Sync;

struct ComputedCore {
    state: Arc<StateCore>,
    compute: Arc<ComputeFn>,
    /// Dependencies the caller pinned in addition to the discovered ones.
    hard_deps: Vec<ObserverId>,
    /// The dependency set discovered by the latest evaluation.
    tracked_deps: RwLock<IndexSet<ObserverId>>,
}

impl ComputedCore {
    /// Run the compute function inside a tracking session and apply the
    /// dependency delta against the previously subscribed set.
    fn compute_tracked(&self, ctx: &Prism) -> Value {
        ctx.tracker().track();
        let value = (self.compute)(ctx);
        let mut found = ctx.tracker().drain();

        for dep in &self.hard_deps {
            found.insert(*dep);
        }
        found.shift_remove(&self.state.observer);

        let previous = self.tracked_deps.read().clone();
        for gone in previous.difference(&found) {
            ctx.graph().undepend(self.state.observer, *gone);
        }
        for added in found.difference(&previous) {
            ctx.graph().depend(self.state.observer, *added);
        }
        *self.tracked_deps.write() = found;

        value
    }

    fn recompute(&self, ctx: &Prism, config: UpdateConfig) {
        let value = self.compute_tracked(ctx);
        // The equality short-circuit sees the fresh value before any job
        // exists; an unchanged result stops the propagation chain here.
        self.state.ingest_value(ctx, value, config);
    }
}

/// Behavior adapter: dependent-triggered ingestion recomputes.
struct ComputedObserver {
    core: Arc<ComputedCore>,
}

impl ObserverBehavior for ComputedObserver {
    fn ingest(&self, ctx: &Prism, config: UpdateConfig) {
        self.core.recompute(ctx, config);
    }

    fn perform(&self, ctx: &Prism, job: &Job) {
        self.core.state.perform_commit(ctx, job);
    }
}

/// A derived reactive value.
#[derive(Clone)]
pub struct Computed {
    ctx: Prism,
    core: Arc<ComputedCore>,
}

impl Computed {
    /// Create a computed and evaluate it once to establish the initial value
    /// and dependency edges.
    pub fn new<F>(ctx: &Prism, compute: F) -> Self
    where
        F: Fn(&Prism) -> Value + Send + Sync + 'static,
    {
        Self::build(ctx, Arc::new(compute), Vec::new())
    }

    /// Create a computed with additional pinned dependencies that are kept
    /// subscribed whether or not the function reads them.
    pub fn with_deps<F>(ctx: &Prism, compute: F, deps: &[ObserverId]) -> Self
    where
        F: Fn(&Prism) -> Value + Send + Sync + 'static,
    {
        Self::build(ctx, Arc::new(compute), deps.to_vec())
    }

    fn build(ctx: &Prism, compute: Arc<ComputeFn>, hard_deps: Vec<ObserverId>) -> Self {
        let observer = ctx.graph().create_observer(None, Value::Null);
        let state = StateCore::new(observer, Value::Null);
        let core = Arc::new(ComputedCore {
            state,
            compute,
            hard_deps,
            tracked_deps: RwLock::new(IndexSet::new()),
        });
        ctx.graph().register_behavior(
            observer,
            Arc::new(ComputedObserver {
                core: Arc::clone(&core),
            }),
        );

        // Initial evaluation: set the cached value directly, without a job.
        // Creating a computed must not notify anyone.
        let initial = core.compute_tracked(ctx);
        ctx.graph().commit(observer, initial);

        Self {
            ctx: ctx.clone(),
            core,
        }
    }

    /// The underlying observer id.
    pub fn observer(&self) -> ObserverId {
        self.core.state.observer
    }

    /// The current derived value. Tracked like a state read.
    pub fn value(&self) -> Value {
        self.ctx.tracker().tracked(self.core.state.observer);
        self.ctx.graph().value(self.core.state.observer)
    }

    /// The current derived value, without dependency tracking.
    pub fn raw_value(&self) -> Value {
        self.ctx.graph().value(self.core.state.observer)
    }

    /// Re-run the compute function now.
    pub fn recompute(&self) -> &Self {
        self.recompute_with(UpdateConfig::default())
    }

    /// [`Computed::recompute`] with explicit options.
    pub fn recompute_with(&self, config: UpdateConfig) -> &Self {
        self.core.recompute(&self.ctx, config);
        self
    }

    /// The dependency set discovered by the latest evaluation.
    pub fn deps(&self) -> IndexSet<ObserverId> {
        self.core.tracked_deps.read().clone()
    }
}

impl std::fmt::Debug for Computed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("observer", &self.core.state.observer.raw())
            .field("value", &self.raw_value())
            .field("deps", &self.deps().len())
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
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn computed_evaluates_on_creation() {
        let ctx = Prism::new();
        let count = ctx.state(json!(2));

        let count_clone = count.clone();
        let doubled = ctx.computed(move |_| json!(count_clone.value().as_i64().unwrap() * 2));

        assert_eq!(doubled.value(), json!(4));
        assert!(doubled.deps().contains(&count.observer()));
    }

    #[test]
    fn computed_follows_its_inputs() {
        let ctx = Prism::new();
        let count = ctx.state(json!(1));

        let count_clone = count.clone();
        let doubled = ctx.computed(move |_| json!(count_clone.value().as_i64().unwrap() * 2));

        count.set(json!(5));
        assert_eq!(doubled.value(), json!(10));

        count.set(json!(7));
        assert_eq!(doubled.value(), json!(14));
    }

    #[test]
    fn dependency_delta_follows_actual_reads() {
        let ctx = Prism::new();
        let use_left = ctx.state(json!(true));
        let left = ctx.state(json!("L"));
        let right = ctx.state(json!("R"));

        let (use_left_c, left_c, right_c) = (use_left.clone(), left.clone(), right.clone());
        let picked = ctx.computed(move |_| {
            if use_left_c.value() == json!(true) {
                left_c.value()
            } else {
                right_c.value()
            }
        });

        assert!(picked.deps().contains(&left.observer()));
        assert!(!picked.deps().contains(&right.observer()));

        // Switch the branch: the dependency set must swap sides.
        use_left.set(json!(false));
        assert_eq!(picked.value(), json!("R"));
        assert!(!picked.deps().contains(&left.observer()));
        assert!(picked.deps().contains(&right.observer()));

        // The dropped input no longer triggers recomputation.
        left.set(json!("L2"));
        assert_eq!(picked.value(), json!("R"));
    }

    #[test]
    fn unchanged_recompute_stops_propagation() {
        let ctx = Prism::new();
        let count = ctx.state(json!(1));

        let count_clone = count.clone();
        let parity = ctx.computed(move |_| json!(count_clone.value().as_i64().unwrap() % 2));

        let downstream_runs = Arc::new(AtomicI32::new(0));
        let runs_clone = downstream_runs.clone();
        let parity_clone = parity.clone();
        let _description = Computed::new(&ctx, move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            json!(format!("parity={}", parity_clone.value()))
        });

        assert_eq!(downstream_runs.load(Ordering::SeqCst), 1);

        // 1 -> 3 keeps parity at 1: no downstream recompute.
        count.set(json!(3));
        assert_eq!(downstream_runs.load(Ordering::SeqCst), 1);

        // 3 -> 4 flips parity: downstream recomputes once.
        count.set(json!(4));
        assert_eq!(downstream_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pinned_deps_stay_subscribed() {
        let ctx = Prism::new();
        let pinned = ctx.state(json!(0));

        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let computed = Computed::with_deps(
            &ctx,
            move |_| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                json!(runs_clone.load(Ordering::SeqCst))
            },
            &[pinned.observer()],
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(computed.deps().contains(&pinned.observer()));

        pinned.set(json!(1));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
