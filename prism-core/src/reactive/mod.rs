//! Reactive Engine
//!
//! This module implements the machinery under every primitive: the observer
//! graph, the dependency tracker, the job scheduler and the subscription
//! controller.
//!
//! # Concepts
//!
//! ## Observers
//!
//! An Observer is one node in the dependency graph: a cached value, a
//! previous value, edges to the observers it depends on and the observers
//! depending on it, and the subscription containers listening to it. The
//! node itself is passive data; its behavior (how to ingest a value, how to
//! perform a job) is registered separately per primitive.
//!
//! ## Jobs and the Runtime
//!
//! Every mutation becomes a Job submitted to the Runtime. Jobs drain
//! synchronously in FIFO order: performing a job re-ingests its dependents
//! onto the same queue, so an entire cascade settles before the outermost
//! mutation call returns. Notification is the one deferred part, delivered
//! in a coalesced pass when the context flushes.
//!
//! ## Tracking
//!
//! Reading a value inside a tracking session records the observer that was
//! read. Computed values use this to discover their inputs instead of
//! declaring them.
//!
//! ## Subscriptions
//!
//! A subscription container represents one render target's interest in a
//! set of observers, either as a plain notifier closure or as an opaque
//! component handle updated through the registered render integration.

pub mod job;
pub mod observer;
pub mod runtime;
pub mod subscription;
pub mod tracker;

pub use job::{Job, UpdateConfig};
pub use observer::{ObserverBehavior, ObserverGraph, ObserverId};
pub use runtime::Runtime;
pub use subscription::{ContainerId, SubController, SubscribeConfig, SubscriptionTarget};
pub use tracker::DependencyTracker;
