//! Selectors
//!
//! A Selector points at one item key in a collection and mirrors that
//! record's value. The mirror is live: commits to the selected item are
//! re-ingested into the selector through a side-effect hook attached to the
//! item's state, so anything subscribed to the selector follows the record
//! without knowing which item is behind it.
//!
//! Selecting a key with no record creates a placeholder item to attach to;
//! when the selection moves on, a placeholder that never received a record
//! is evicted from the collection again.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use super::{CollectionCore, Item, ItemKey};
use crate::context::Prism;
use crate::reactive::job::UpdateConfig;
use crate::reactive::observer::{ObserverBehavior, ObserverId};
use crate::state::StateCore;

/// Options for [`Selector::select_with`].
#[derive(Debug, Clone, Default)]
pub struct SelectConfig {
    /// Re-run the selection even when the key is already selected.
    pub force: bool,
    /// Keep the previous item alive even if it is an unfilled placeholder.
    pub overwrite: bool,
    /// Apply the new selection without notifying subscribers.
    pub background: bool,
}

struct SelectorCore {
    state: Arc<StateCore>,
    collection: Weak<CollectionCore>,
    key: RwLock<Option<ItemKey>>,
    item: RwLock<Option<Item>>,
}

impl SelectorCore {
    /// Name of the side-effect slot this selector occupies on its item.
    fn hook_name(&self) -> String {
        format!("selector-{}", self.state.observer.raw())
    }
}

/// Behavior adapter for the selector's own observer.
struct SelectorObserver {
    core: Arc<SelectorCore>,
}

impl ObserverBehavior for SelectorObserver {
    fn ingest(&self, ctx: &Prism, config: UpdateConfig) {
        self.core.state.ingest(ctx, config);
    }

    fn perform(&self, ctx: &Prism, job: &crate::reactive::job::Job) {
        self.core.state.perform_commit(ctx, job);
    }
}

/// A live pointer at one record of a collection.
#[derive(Clone)]
pub struct Selector {
    ctx: Prism,
    core: Arc<SelectorCore>,
}

impl Selector {
    pub(crate) fn new(ctx: &Prism, collection: Weak<CollectionCore>, item_key: &str) -> Self {
        let observer = ctx.graph().create_observer(None, Value::Null);
        let state = StateCore::new(observer, Value::Null);
        let core = Arc::new(SelectorCore {
            state,
            collection,
            key: RwLock::new(None),
            item: RwLock::new(None),
        });
        ctx.graph().register_behavior(
            observer,
            Arc::new(SelectorObserver {
                core: Arc::clone(&core),
            }),
        );

        let selector = Self {
            ctx: ctx.clone(),
            core,
        };
        selector.select_with(
            item_key,
            SelectConfig {
                force: true,
                ..SelectConfig::default()
            },
        );
        selector
    }

    /// The underlying observer id.
    pub fn observer(&self) -> ObserverId {
        self.core.state.observer
    }

    /// Point the selector at `key`.
    pub fn select(&self, key: &str) -> &Self {
        self.select_with(key, SelectConfig::default())
    }

    /// [`Selector::select`] with explicit options.
    ///
    /// Selecting the already selected key is a no-op unless `force` is set.
    pub fn select_with(&self, key: &str, config: SelectConfig) -> &Self {
        let same = self.core.key.read().as_deref() == Some(key);
        if same && !config.force {
            warn!(key, "key is already selected; skipping");
            return self;
        }
        let Some(collection) = self.core.collection.upgrade() else {
            warn!(key, "collection no longer exists; cannot select");
            return self;
        };

        self.detach_current(&collection, config.overwrite);
        *self.core.key.write() = Some(key.to_string());

        let item = collection.item_or_placeholder(&self.ctx, key);
        self.attach_hook(&item);
        *self.core.item.write() = Some(item.clone());

        self.core.state.ingest_value(
            &self.ctx,
            item.raw_value(),
            UpdateConfig {
                force: true,
                background: config.background,
                ..UpdateConfig::default()
            },
        );
        self
    }

    /// Drop the selection and reset the selector's value to null.
    pub fn unselect(&self) -> &Self {
        if let Some(collection) = self.core.collection.upgrade() {
            self.detach_current(&collection, false);
        } else if let Some(old) = self.core.item.write().take() {
            old.state().core().remove_side_effect(&self.core.hook_name());
        }
        *self.core.key.write() = None;
        self.core
            .state
            .ingest_value(&self.ctx, Value::Null, UpdateConfig::default());
        self
    }

    /// Detach from the current item, evicting it when it is an unfilled
    /// placeholder and `keep_placeholder` is not set.
    fn detach_current(&self, collection: &Arc<CollectionCore>, keep_placeholder: bool) {
        let Some(old) = self.core.item.write().take() else {
            return;
        };
        old.state().core().remove_side_effect(&self.core.hook_name());
        if old.is_placeholder() && !keep_placeholder {
            collection
                .items
                .write()
                .retain(|_, item| item.observer() != old.observer());
        }
    }

    /// Wire the hook that mirrors item commits into the selector.
    fn attach_hook(&self, item: &Item) {
        let weak = Arc::downgrade(&self.core);
        let item_observer = item.observer();
        item.state()
            .core()
            .add_side_effect(&self.core.hook_name(), move |ctx, config| {
                if let Some(core) = weak.upgrade() {
                    core.state.ingest_value(
                        ctx,
                        ctx.graph().value(item_observer),
                        UpdateConfig {
                            background: config.background,
                            ..UpdateConfig::default()
                        },
                    );
                }
            });
    }

    /// The mirrored record value. Tracked like a state read.
    pub fn value(&self) -> Value {
        self.ctx.tracker().tracked(self.core.state.observer);
        self.ctx.graph().value(self.core.state.observer)
    }

    /// The mirrored record value, without dependency tracking.
    pub fn raw_value(&self) -> Value {
        self.ctx.graph().value(self.core.state.observer)
    }

    /// The currently selected item key, if any.
    pub fn selected_key(&self) -> Option<ItemKey> {
        self.core.key.read().clone()
    }

    /// The currently attached item, if any.
    pub fn item(&self) -> Option<Item> {
        self.core.item.read().clone()
    }

    /// Whether `key` is the current selection.
    pub fn has_selected(&self, key: &str) -> bool {
        self.selected_key().as_deref() == Some(key)
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("observer", &self.core.state.observer.raw())
            .field("key", &self.selected_key())
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

    #[test]
    fn selector_mirrors_the_selected_record() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!({"id": 1, "text": "a"}));

        let selector = todos.create_selector("current", "1");
        assert_eq!(selector.value(), json!({"id": 1, "text": "a"}));

        todos.update("1", json!({"text": "b"}));
        assert_eq!(selector.value(), json!({"id": 1, "text": "b"}));
    }

    #[test]
    fn reselecting_moves_the_mirror() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!([{"id": 1, "n": "a"}, {"id": 2, "n": "b"}]));
        let selector = todos.create_selector("current", "1");

        selector.select("2");
        assert_eq!(selector.value(), json!({"id": 2, "n": "b"}));

        // The old item no longer feeds the selector.
        todos.update("1", json!({"n": "a2"}));
        assert_eq!(selector.value(), json!({"id": 2, "n": "b"}));
    }

    #[test]
    fn reselecting_the_same_key_is_a_noop_without_force() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!({"id": 1}));
        let selector = todos.create_selector("current", "1");

        selector.select("1");
        assert_eq!(selector.selected_key().as_deref(), Some("1"));
        assert_eq!(selector.value(), json!({"id": 1}));
    }

    #[test]
    fn selecting_a_missing_key_creates_a_placeholder_that_fills_in() {
        let ctx = Prism::new();
        let todos = ctx.collection();

        let selector = todos.create_selector("current", "5");
        assert_eq!(selector.value(), json!({"id": "5"}));
        assert!(selector.item().unwrap().is_placeholder());

        todos.collect(json!({"id": 5, "text": "arrived"}));
        assert_eq!(selector.value(), json!({"id": 5, "text": "arrived"}));
        assert!(!selector.item().unwrap().is_placeholder());
    }

    #[test]
    fn moving_off_an_unfilled_placeholder_evicts_it() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!({"id": 1}));

        let selector = todos.create_selector("current", "ghost");
        assert!(selector.item().unwrap().is_placeholder());

        selector.select("1");
        assert_eq!(selector.value(), json!({"id": 1}));
        assert_eq!(todos.core.items.read().len(), 1);
    }

    #[test]
    fn unselect_resets_to_null() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!({"id": 1, "text": "a"}));
        let selector = todos.create_selector("current", "1");

        selector.unselect();
        assert_eq!(selector.value(), Value::Null);
        assert!(selector.selected_key().is_none());

        // Detached: record changes no longer reach the selector.
        todos.update("1", json!({"text": "b"}));
        assert_eq!(selector.value(), Value::Null);
    }
}
