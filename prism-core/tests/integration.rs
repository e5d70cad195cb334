//! End-to-end tests exercising the reactive core the way a framework
//! adapter would: register an integration, subscribe render targets, mutate
//! state and flush the deferred notification pass.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};

use prism_core::reactive::{SubscribeConfig, SubscriptionTarget};
use prism_core::{
    CollectConfig, CollectionConfig, ComponentHandle, CoreError, Prism, RenderIntegration,
    StorageBackend, UpdateConfig,
};

/// Records every `update` call so tests can assert on delivered payloads.
struct TestIntegration {
    bind_ready: bool,
    updates: Mutex<Vec<(String, IndexMap<String, Value>)>>,
}

impl TestIntegration {
    fn new(bind_ready: bool) -> Arc<Self> {
        Arc::new(Self {
            bind_ready,
            updates: Mutex::new(Vec::new()),
        })
    }

    fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

impl RenderIntegration for TestIntegration {
    fn key(&self) -> &str {
        "test"
    }

    fn bind(&self, _component: &ComponentHandle) -> Result<bool, CoreError> {
        Ok(self.bind_ready)
    }

    fn update(
        &self,
        component: &ComponentHandle,
        changed: &IndexMap<String, Value>,
    ) -> Result<(), CoreError> {
        let name = component
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        self.updates.lock().push((name, changed.clone()));
        Ok(())
    }
}

/// In-memory storage backend for persistence tests.
#[derive(Default)]
struct MemoryStorage {
    entries: Mutex<IndexMap<String, Value>>,
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CoreError> {
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.lock().shift_remove(key);
        Ok(())
    }
}

/// Subscribe a counting callback container to one observer.
fn count_notifications(ctx: &Prism, observer: prism_core::ObserverId) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    ctx.sub_controller().subscribe_with_array(
        ctx,
        SubscriptionTarget::callback(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }),
        &[observer],
        SubscribeConfig::default(),
    );
    count
}

#[test]
fn notifications_wait_for_flush() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let state = ctx.state(json!(0));
    let notified = count_notifications(&ctx, state.observer());

    state.set(json!(1));
    // The value is applied synchronously but nothing is delivered yet.
    assert_eq!(state.raw_value(), json!(1));
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn one_burst_coalesces_into_one_notification() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let state = ctx.state(json!(0));
    let notified = count_notifications(&ctx, state.observer());

    state.set(json!(1));
    state.set(json!(2));
    state.set(json!(3));
    ctx.flush();

    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // A flush with nothing staged delivers nothing.
    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn unchanged_values_never_notify() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let state = ctx.state(json!(5));
    let notified = count_notifications(&ctx, state.observer());

    state.set(json!(5));
    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    state.set(json!(6));
    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    state.set(json!(6));
    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn background_updates_apply_without_notifying() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let state = ctx.state(json!(0));
    let notified = count_notifications(&ctx, state.observer());

    state.set_with(json!(1), UpdateConfig::background());
    ctx.flush();

    assert_eq!(state.raw_value(), json!(1));
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[test]
fn computed_cascade_notifies_through_flush() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let count = ctx.state(json!(1));

    let count_clone = count.clone();
    let doubled = ctx.computed(move |_| json!(count_clone.value().as_i64().unwrap() * 2));
    let notified = count_notifications(&ctx, doubled.observer());

    count.set(json!(2));
    ctx.flush();
    assert_eq!(doubled.raw_value(), json!(4));
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // An input change that leaves the derived value unchanged stays silent.
    let parity_input = ctx.state(json!(1));
    let parity_clone = parity_input.clone();
    let parity = ctx.computed(move |_| json!(parity_clone.value().as_i64().unwrap() % 2));
    let parity_notified = count_notifications(&ctx, parity.observer());

    parity_input.set(json!(3));
    ctx.flush();
    assert_eq!(parity_notified.load(Ordering::SeqCst), 0);
}

#[test]
fn not_ready_containers_replay_exactly_once() {
    let ctx = Prism::new();
    let integration = TestIntegration::new(false);
    ctx.register_integration(integration.clone());
    let state = ctx.state(json!(0));

    let mut mapping = IndexMap::new();
    mapping.insert("value".to_string(), state.observer());
    let (container, _) = ctx.sub_controller().subscribe_with_mapping(
        &ctx,
        SubscriptionTarget::component(String::from("widget")),
        mapping,
        SubscribeConfig::default(),
    );

    state.set(json!(1));
    ctx.flush();
    // The component has not mounted; the job is parked, not dropped.
    assert_eq!(integration.update_count(), 0);
    assert!(ctx.runtime().has_pending_notifications());

    ctx.sub_controller().set_ready(container, true);
    ctx.flush();
    assert_eq!(integration.update_count(), 1);

    let (name, changed) = integration.updates.lock()[0].clone();
    assert_eq!(name, "widget");
    assert_eq!(changed.get("value"), Some(&json!(1)));

    // Replay happens once; later flushes deliver nothing new.
    ctx.flush();
    assert_eq!(integration.update_count(), 1);
}

#[test]
fn component_updates_carry_only_changed_names() {
    let ctx = Prism::new();
    let integration = TestIntegration::new(true);
    ctx.register_integration(integration.clone());
    let name = ctx.state(json!("ada"));
    let age = ctx.state(json!(36));

    let mut mapping = IndexMap::new();
    mapping.insert("name".to_string(), name.observer());
    mapping.insert("age".to_string(), age.observer());
    ctx.sub_controller().subscribe_with_mapping(
        &ctx,
        SubscriptionTarget::component(String::from("profile")),
        mapping,
        SubscribeConfig::default(),
    );

    age.set(json!(37));
    ctx.flush();

    assert_eq!(integration.update_count(), 1);
    let (_, changed) = integration.updates.lock()[0].clone();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed.get("age"), Some(&json!(37)));
}

#[test]
fn group_changes_for_unknown_records_default_to_background() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let todos = ctx.collection();
    todos.collect(json!([{"id": 1}, {"id": 2}]));

    let group = todos.create_group("view");
    let notified = count_notifications(&ctx, group.observer());

    // No record behind "ghost": applied silently.
    group.add(&["ghost"], Default::default());
    ctx.flush();
    assert_eq!(group.keys(), vec!["ghost"]);
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    // "1" has a real record: visible change.
    group.add(&["1"], Default::default());
    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn background_item_mutations_stay_silent_at_the_group() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let todos = ctx.collection();
    todos.collect(json!({"id": 1, "text": "old"}));
    let group = todos.default_group();
    ctx.flush();

    let notified = count_notifications(&ctx, group.observer());
    let item = todos.get_item("1").unwrap();

    // A suppressed record write must not surface as a visible group job.
    item.state()
        .set_with(json!({"id": 1, "text": "new"}), UpdateConfig::background());
    ctx.flush();
    assert_eq!(group.output(), vec![json!({"id": 1, "text": "new"})]);
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    // A visible write still notifies through the group.
    item.state().set(json!({"id": 1, "text": "newer"}));
    ctx.flush();
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn background_collect_applies_without_notifying() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let todos = ctx.collection();
    let group = todos.default_group();
    let notified = count_notifications(&ctx, group.observer());

    todos.collect_with_config(
        json!({"id": 1, "text": "quiet"}),
        &[],
        CollectConfig {
            background: Some(true),
            ..CollectConfig::default()
        },
    );
    ctx.flush();

    assert_eq!(todos.size(), 1);
    assert_eq!(group.keys(), vec!["1"]);
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[test]
fn collection_end_to_end() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let todos = ctx.collection_with_config(CollectionConfig {
        key: Some("todos".to_string()),
        ..CollectionConfig::default()
    });

    todos.collect(json!([
        {"id": 1, "text": "one"},
        {"id": 2, "text": "two"},
        {"id": 3, "text": "three"},
    ]));
    let group = todos.default_group();
    assert_eq!(
        group.output(),
        vec![
            json!({"id": 1, "text": "one"}),
            json!({"id": 2, "text": "two"}),
            json!({"id": 3, "text": "three"}),
        ]
    );
    ctx.flush();

    let notified = count_notifications(&ctx, group.observer());
    todos.remove_items(&["2"]);
    ctx.flush();

    assert_eq!(
        group.output(),
        vec![
            json!({"id": 1, "text": "one"}),
            json!({"id": 3, "text": "three"}),
        ]
    );
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn selector_reselection_notifies_once() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let todos = ctx.collection();
    todos.collect(json!([{"id": "a", "n": 1}, {"id": "b", "n": 2}]));
    let selector = todos.create_selector("current", "a");
    ctx.flush();

    let notified = count_notifications(&ctx, selector.observer());
    selector.select("b");
    ctx.flush();

    assert_eq!(selector.value(), json!({"id": "b", "n": 2}));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn persisted_state_loads_and_writes() {
    let storage = Arc::new(MemoryStorage::default());
    storage
        .set("counter", &json!(41))
        .expect("seed stored value");

    let ctx = Prism::new();
    ctx.register_storage(storage.clone());

    let count = ctx.state(json!(0));
    count.persist("counter");
    // The stored value wins over the initial one.
    assert_eq!(count.raw_value(), json!(41));

    count.set(json!(42));
    assert_eq!(storage.entries.lock().get("counter"), Some(&json!(42)));

    count.delete_persisted();
    assert!(storage.entries.lock().get("counter").is_none());
}

#[test]
fn events_flow_through_the_same_scheduler() {
    let ctx = Prism::new();
    ctx.register_integration(TestIntegration::new(true));
    let alert = ctx.event();
    let notified = count_notifications(&ctx, alert.observer());

    let payloads = Arc::new(Mutex::new(Vec::new()));
    let payloads_clone = payloads.clone();
    alert.on(move |_, payload| {
        payloads_clone.lock().push(payload.clone());
    });

    alert.trigger(json!("ping"));
    alert.trigger(json!("ping"));
    ctx.flush();

    // Callbacks fire per trigger; the render notification coalesces.
    assert_eq!(payloads.lock().len(), 2);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}
