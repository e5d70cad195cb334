//! Prism Core
//!
//! This crate provides the reactive core of the Prism state-management
//! library. It implements:
//!
//! - Reactive primitives (states, computed values, events)
//! - Collections with grouped and selected views over keyed records
//! - A synchronous job scheduler with deferred, coalesced notification
//! - Pluggable render-integration and persistence seams
//!
//! Everything hangs off an explicit [`Prism`] context: there are no
//! process-wide singletons, and multiple independent contexts coexist in
//! one process.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: observer graph, dependency tracker, job scheduler and
//!   subscription controller
//! - `state`, `computed`, `event`: the value-level primitives
//! - `collection`: keyed record sets with groups and selectors
//! - `integration`, `storage`: the external adapter contracts
//!
//! # Example
//!
//! ```rust,ignore
//! use prism_core::{Prism, Value};
//! use serde_json::json;
//!
//! let ctx = Prism::new();
//!
//! // A plain piece of state.
//! let count = ctx.state(json!(0));
//!
//! // A derived value that tracks what it reads.
//! let count_for_doubled = count.clone();
//! let doubled = ctx.computed(move |_| {
//!     json!(count_for_doubled.value().as_i64().unwrap() * 2)
//! });
//!
//! count.set(json!(5));
//! assert_eq!(doubled.value(), json!(10));
//!
//! // Deliver the coalesced notifications for this action.
//! ctx.flush();
//! ```

pub mod collection;
pub mod computed;
pub mod context;
pub mod error;
pub mod event;
pub mod integration;
pub mod reactive;
pub mod state;
pub mod storage;

pub use collection::{
    CollectConfig, Collection, CollectionConfig, Group, Item, ItemKey, SelectConfig, Selector,
    UpdateItemConfig,
};
pub use computed::Computed;
pub use context::Prism;
pub use error::CoreError;
pub use event::Event;
pub use integration::{ComponentHandle, RenderIntegration};
pub use reactive::{ObserverId, SubscribeConfig, SubscriptionTarget, UpdateConfig};
pub use state::State;
pub use storage::StorageBackend;

pub use serde_json::Value;
