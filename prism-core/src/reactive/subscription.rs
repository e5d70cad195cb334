//! Subscription Containers
//!
//! A subscription container is the engine-side handle for one render
//! target's interest in a set of observers. Containers come in two flavors:
//!
//! - **Callback-flavored**: the target is a plain notifier closure, invoked
//!   whenever any subscribed observer changes.
//! - **Component-flavored**: the target is an opaque render-target handle;
//!   changed data is delivered through the registered render integration.
//!
//! Object-shaped containers additionally carry a name -> observer mapping.
//! For those, the notification pass records which named sub-key each job's
//! observer corresponds to, and the eventual update is restricted to the
//! accumulated changed names.
//!
//! # Readiness
//!
//! `ready` starts false and flips once the render target confirms mounting
//! (synchronously via the integration's `bind`, or later via `set_ready`).
//! While a container is not ready, pending changes accumulate instead of
//! being dropped; the scheduler replays them on a later pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::observer::ObserverId;
use crate::context::Prism;
use crate::integration::ComponentHandle;

/// Unique identifier for a subscription container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Generate a new unique container ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

/// The render target a container notifies.
#[derive(Clone)]
pub enum SubscriptionTarget {
    /// A plain notifier closure.
    Callback(Arc<dyn Fn() + Send + Sync>),
    /// An opaque render-target handle, updated through the integration.
    Component(ComponentHandle),
}

impl SubscriptionTarget {
    /// Wrap a notifier closure.
    pub fn callback<F: Fn() + Send + Sync + 'static>(notify: F) -> Self {
        Self::Callback(Arc::new(notify))
    }

    /// Wrap a component render target.
    pub fn component<T: std::any::Any + Send + Sync>(target: T) -> Self {
        Self::Component(ComponentHandle::new(target))
    }
}

/// Options for constructing a subscription container.
#[derive(Debug, Clone, Default)]
pub struct SubscribeConfig {
    /// Distinct container key; construction is idempotent per key.
    pub key: Option<String>,
    /// Override the computed initial readiness.
    pub ready: Option<bool>,
}

/// Engine-side record of one render target's subscriptions.
struct SubscriptionContainer {
    key: Option<String>,
    ready: bool,
    observers: IndexSet<ObserverId>,
    target: SubscriptionTarget,
    /// Name -> observer association for object-shaped containers.
    mapping: Option<IndexMap<String, ObserverId>>,
    /// Changed sub-key names accumulated since the last delivered update.
    updated_names: IndexSet<String>,
}

impl SubscriptionContainer {
    /// Record that `observer` changed, translating it to a mapped sub-key
    /// name for object-shaped containers.
    fn record_change(&mut self, observer: ObserverId) {
        if let Some(mapping) = &self.mapping {
            if let Some((name, _)) = mapping.iter().find(|(_, id)| **id == observer) {
                self.updated_names.insert(name.clone());
            }
        }
    }
}

/// Outcome of staging one (job, container) pair during a notification pass.
pub(crate) enum StageOutcome {
    /// The container no longer exists; forget it.
    Gone,
    /// The container is ready; deliver to it.
    Ready,
    /// The container is not ready; keep the job for replay.
    NotReady,
}

/// A prepared notification, extracted with no controller lock held.
pub(crate) enum Delivery {
    Callback(Arc<dyn Fn() + Send + Sync>),
    Component {
        target: ComponentHandle,
        changed: IndexMap<String, Value>,
    },
}

/// Registry and lifecycle manager for subscription containers.
pub struct SubController {
    containers: RwLock<IndexMap<ContainerId, SubscriptionContainer>>,
    keyed: RwLock<IndexMap<String, ContainerId>>,
}

impl SubController {
    /// Create an empty controller.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(IndexMap::new()),
            keyed: RwLock::new(IndexMap::new()),
        }
    }

    /// Subscribe a render target to a flat list of observers.
    ///
    /// Duplicate container keys are idempotent: the existing container is
    /// returned and nothing new is constructed.
    pub fn subscribe_with_array(
        &self,
        ctx: &Prism,
        target: SubscriptionTarget,
        observers: &[ObserverId],
        config: SubscribeConfig,
    ) -> ContainerId {
        if let Some(existing) = self.existing_for_key(&config) {
            return existing;
        }
        self.register(ctx, target, observers.iter().copied().collect(), None, config)
    }

    /// Subscribe a render target to a name -> observer mapping.
    ///
    /// Returns the container plus an immediate `{name: value}` snapshot for
    /// first-render use; the mapping is retained so later updates can be
    /// restricted to the sub-keys that actually changed.
    pub fn subscribe_with_mapping(
        &self,
        ctx: &Prism,
        target: SubscriptionTarget,
        mapping: IndexMap<String, ObserverId>,
        config: SubscribeConfig,
    ) -> (ContainerId, IndexMap<String, Value>) {
        let snapshot: IndexMap<String, Value> = mapping
            .iter()
            .map(|(name, id)| (name.clone(), ctx.graph().value(*id)))
            .collect();

        if let Some(existing) = self.existing_for_key(&config) {
            return (existing, snapshot);
        }

        let observers: IndexSet<ObserverId> = mapping.values().copied().collect();
        let id = self.register(ctx, target, observers, Some(mapping), config);
        (id, snapshot)
    }

    /// Check for an already registered container under the config's key.
    fn existing_for_key(&self, config: &SubscribeConfig) -> Option<ContainerId> {
        let key = config.key.as_deref()?;
        let existing = self.keyed.read().get(key).copied()?;
        warn!(key, "subscription container key already registered; reusing");
        Some(existing)
    }

    fn register(
        &self,
        ctx: &Prism,
        target: SubscriptionTarget,
        observers: IndexSet<ObserverId>,
        mapping: Option<IndexMap<String, ObserverId>>,
        config: SubscribeConfig,
    ) -> ContainerId {
        let id = ContainerId::new();

        // Callback targets have no mount phase; component targets are asked
        // through the integration's bind hook.
        let ready = config.ready.unwrap_or_else(|| match &target {
            SubscriptionTarget::Callback(_) => true,
            SubscriptionTarget::Component(handle) => match ctx.integration() {
                Some(integration) => match integration.bind(handle) {
                    Ok(ready) => ready,
                    Err(err) => {
                        warn!(%err, "render integration bind failed; container stays not ready");
                        false
                    }
                },
                None => {
                    info!("no render integration registered; component container stays not ready");
                    false
                }
            },
        });

        for observer in &observers {
            ctx.graph().subscribe(*observer, id);
        }

        if let Some(key) = &config.key {
            self.keyed.write().insert(key.clone(), id);
        }

        debug!(
            container = id.raw(),
            ready,
            observers = observers.len(),
            "registered subscription container"
        );
        self.containers.write().insert(
            id,
            SubscriptionContainer {
                key: config.key,
                ready,
                observers,
                target,
                mapping,
                updated_names: IndexSet::new(),
            },
        );
        id
    }

    /// Tear down a container and its bidirectional observer links.
    pub fn unsubscribe(&self, ctx: &Prism, id: ContainerId) {
        let container = self.containers.write().shift_remove(&id);
        match container {
            Some(container) => {
                for observer in &container.observers {
                    ctx.graph().unsubscribe(*observer, id);
                }
                if let Some(key) = &container.key {
                    self.keyed.write().shift_remove(key);
                }
                debug!(container = id.raw(), "unsubscribed container");
            }
            None => warn!(container = id.raw(), "unsubscribe on unknown container"),
        }
    }

    /// Flip a container's readiness once its render target (un)mounts.
    pub fn set_ready(&self, id: ContainerId, ready: bool) {
        match self.containers.write().get_mut(&id) {
            Some(container) => container.ready = ready,
            None => warn!(container = id.raw(), "set_ready on unknown container"),
        }
    }

    /// Whether a container is ready to be notified.
    pub fn is_ready(&self, id: ContainerId) -> bool {
        self.containers
            .read()
            .get(&id)
            .map(|container| container.ready)
            .unwrap_or(false)
    }

    /// Look up a container registered under a distinct key.
    pub fn container_by_key(&self, key: &str) -> Option<ContainerId> {
        self.keyed.read().get(key).copied()
    }

    /// Number of live containers.
    pub fn container_count(&self) -> usize {
        self.containers.read().len()
    }

    /// Stage one (job, container) pair: record the changed sub-key for
    /// object-shaped containers and report readiness.
    pub(crate) fn stage(&self, id: ContainerId, observer: ObserverId) -> StageOutcome {
        let mut containers = self.containers.write();
        match containers.get_mut(&id) {
            Some(container) => {
                container.record_change(observer);
                if container.ready {
                    StageOutcome::Ready
                } else {
                    StageOutcome::NotReady
                }
            }
            None => StageOutcome::Gone,
        }
    }

    /// Extract everything needed to notify a staged container, draining its
    /// accumulated changed names. The returned delivery is executed by the
    /// runtime with no controller lock held.
    pub(crate) fn take_delivery(&self, ctx: &Prism, id: ContainerId) -> Option<Delivery> {
        let mut containers = self.containers.write();
        let container = containers.get_mut(&id)?;

        match &container.target {
            SubscriptionTarget::Callback(notify) => Some(Delivery::Callback(Arc::clone(notify))),
            SubscriptionTarget::Component(handle) => {
                let target = handle.clone();
                let changed: IndexMap<String, Value> = match &container.mapping {
                    Some(mapping) => container
                        .updated_names
                        .iter()
                        .filter_map(|name| {
                            mapping
                                .get(name)
                                .map(|id| (name.clone(), ctx.graph().value(*id)))
                        })
                        .collect(),
                    None => IndexMap::new(),
                };
                container.updated_names.clear();
                Some(Delivery::Component { target, changed })
            }
        }
    }
}

impl Default for SubController {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_container_keys_are_idempotent() {
        let ctx = Prism::new();
        let state = ctx.state(json!(0));

        let config = SubscribeConfig {
            key: Some("header".to_string()),
            ready: None,
        };
        let first = ctx.sub_controller().subscribe_with_array(
            &ctx,
            SubscriptionTarget::callback(|| {}),
            &[state.observer()],
            config.clone(),
        );
        let second = ctx.sub_controller().subscribe_with_array(
            &ctx,
            SubscriptionTarget::callback(|| {}),
            &[state.observer()],
            config,
        );

        assert_eq!(first, second);
        assert_eq!(ctx.sub_controller().container_count(), 1);
        assert_eq!(ctx.sub_controller().container_by_key("header"), Some(first));
    }

    #[test]
    fn mapping_subscription_returns_a_snapshot() {
        let ctx = Prism::new();
        let name = ctx.state(json!("ada"));
        let age = ctx.state(json!(36));

        let mut mapping = IndexMap::new();
        mapping.insert("name".to_string(), name.observer());
        mapping.insert("age".to_string(), age.observer());

        let (_, snapshot) = ctx.sub_controller().subscribe_with_mapping(
            &ctx,
            SubscriptionTarget::callback(|| {}),
            mapping,
            SubscribeConfig::default(),
        );

        assert_eq!(snapshot.get("name"), Some(&json!("ada")));
        assert_eq!(snapshot.get("age"), Some(&json!(36)));
    }

    #[test]
    fn callback_containers_start_ready() {
        let ctx = Prism::new();
        let state = ctx.state(json!(0));

        let id = ctx.sub_controller().subscribe_with_array(
            &ctx,
            SubscriptionTarget::callback(|| {}),
            &[state.observer()],
            SubscribeConfig::default(),
        );

        assert!(ctx.sub_controller().is_ready(id));
    }

    #[test]
    fn component_containers_wait_without_an_integration() {
        let ctx = Prism::new();
        let state = ctx.state(json!(0));

        let id = ctx.sub_controller().subscribe_with_array(
            &ctx,
            SubscriptionTarget::component("widget"),
            &[state.observer()],
            SubscribeConfig::default(),
        );

        assert!(!ctx.sub_controller().is_ready(id));
        ctx.sub_controller().set_ready(id, true);
        assert!(ctx.sub_controller().is_ready(id));
    }

    #[test]
    fn unsubscribe_detaches_both_sides() {
        let ctx = Prism::new();
        let state = ctx.state(json!(0));

        let id = ctx.sub_controller().subscribe_with_array(
            &ctx,
            SubscriptionTarget::callback(|| {}),
            &[state.observer()],
            SubscribeConfig {
                key: Some("header".to_string()),
                ready: None,
            },
        );
        assert_eq!(ctx.graph().subscriber_count(state.observer()), 1);

        ctx.sub_controller().unsubscribe(&ctx, id);

        assert_eq!(ctx.sub_controller().container_count(), 0);
        assert_eq!(ctx.graph().subscriber_count(state.observer()), 0);
        assert!(ctx.sub_controller().container_by_key("header").is_none());
    }
}
