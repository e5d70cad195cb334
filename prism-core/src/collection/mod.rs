//! Collections
//!
//! A Collection is a dynamic set of record items keyed by a primary-key
//! field. Each record lives in its own [`Item`] state, so mutating one
//! record notifies only the render targets that actually read it. On top of
//! the record table sit two derived views:
//!
//! - [`Group`]: an ordered list of item keys, materialized into an output
//!   array of record values.
//! - [`Selector`]: a pointer at one item key that mirrors that record's
//!   value, following it across updates, re-keys and removals.
//!
//! # How Collect Works
//!
//! 1. Each record must be an object carrying the configured primary key;
//!    records without one are skipped with a warning.
//! 2. The record lands in its own item state (reusing an existing item or
//!    placeholder for the same key).
//! 3. The key is appended to every named group plus the default group.
//! 4. Item mutations afterwards re-trigger every group whose key list
//!    contains the item.
//!
//! # Placeholders
//!
//! Selecting a key with no backing record creates a placeholder item holding
//! only `{primary_key: key}`. Placeholders are invisible to lookups and group
//! outputs; a later collect of the real record fills them in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Prism;
use crate::reactive::job::UpdateConfig;
use crate::reactive::observer::ObserverId;
use crate::state::State;

pub mod group;
pub mod selector;

pub use group::{Group, GroupAddConfig, GroupAddMethod, GroupRemoveConfig};
pub use selector::{SelectConfig, Selector};

/// Primary-key value of one record, stringified.
pub type ItemKey = String;

/// Collection construction options.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Diagnostic key for the collection.
    pub key: Option<String>,
    /// Record field holding the item key.
    pub primary_key: String,
    /// Name of the group every collected record joins.
    pub default_group_key: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            key: None,
            primary_key: "id".to_string(),
            default_group_key: "default".to_string(),
        }
    }
}

/// Options for [`Collection::collect_with_config`].
#[derive(Debug, Clone, Default)]
pub struct CollectConfig {
    /// Where the collected keys land in each target group.
    pub method: GroupAddMethod,
    /// Override the computed background default for the group placement and
    /// apply the record writes silently.
    pub background: Option<bool>,
}

/// Options for [`Collection::update_with`].
#[derive(Debug, Clone)]
pub struct UpdateItemConfig {
    /// Shallow-merge the changes into the record instead of replacing it.
    pub patch: bool,
    /// Apply the update without notifying subscribers.
    pub background: bool,
}

impl Default for UpdateItemConfig {
    fn default() -> Self {
        Self {
            patch: true,
            background: false,
        }
    }
}

/// One record's state within a collection.
#[derive(Clone)]
pub struct Item {
    state: State,
    placeholder: Arc<AtomicBool>,
}

impl Item {
    /// The record's value. Tracked like a state read.
    pub fn value(&self) -> Value {
        self.state.value()
    }

    /// The record's value, without dependency tracking.
    pub fn raw_value(&self) -> Value {
        self.state.raw_value()
    }

    /// The underlying observer id.
    pub fn observer(&self) -> ObserverId {
        self.state.observer()
    }

    /// The backing state, for subscribing or attaching side effects.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Replace the record value.
    pub fn set(&self, value: Value) -> &Self {
        self.state.set(value);
        self
    }

    /// Shallow-merge changes into the record.
    pub fn patch(&self, changes: Value) -> &Self {
        self.state.patch(changes);
        self
    }

    /// Whether this item was created as a selector placeholder and has not
    /// received a real record yet.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("observer", &self.state.observer().raw())
            .field("placeholder", &self.is_placeholder())
            .finish()
    }
}

/// Shared core: the record table plus the derived views built over it.
pub(crate) struct CollectionCore {
    pub(crate) config: CollectionConfig,
    pub(crate) items: RwLock<IndexMap<ItemKey, Item>>,
    pub(crate) groups: RwLock<IndexMap<String, Group>>,
    pub(crate) selectors: RwLock<IndexMap<String, Selector>>,
}

impl CollectionCore {
    /// Stringify a primary-key field value into an item key.
    pub(crate) fn item_key_from(value: &Value) -> Option<ItemKey> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Whether a real (non-placeholder) item exists for `key`.
    pub(crate) fn has_real_item(&self, key: &str) -> bool {
        self.items
            .read()
            .get(key)
            .map(|item| !item.is_placeholder())
            .unwrap_or(false)
    }

    /// Build an item state for `key` and wire the group-rebuild hook.
    fn create_item(
        self: &Arc<Self>,
        ctx: &Prism,
        key: &str,
        value: Value,
        placeholder: bool,
    ) -> Item {
        let state = State::new(ctx, value);
        let item = Item {
            state,
            placeholder: Arc::new(AtomicBool::new(placeholder)),
        };
        self.attach_group_hook(&item, key);
        self.items.write().insert(key.to_string(), item.clone());
        item
    }

    /// (Re)register the side effect that re-triggers containing groups when
    /// the item's record commits.
    fn attach_group_hook(self: &Arc<Self>, item: &Item, key: &str) {
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        item.state.core().remove_side_effect("rebuild-group");
        item.state.core().add_side_effect("rebuild-group", move |ctx, config| {
            if let Some(core) = weak.upgrade() {
                core.rebuild_groups_that_include(ctx, &key, config);
            }
        });
    }

    /// Look up an item, creating a placeholder when none exists.
    pub(crate) fn item_or_placeholder(self: &Arc<Self>, ctx: &Prism, key: &str) -> Item {
        if let Some(item) = self.items.read().get(key) {
            return item.clone();
        }
        warn!(key, "item does not exist; creating placeholder");
        let mut record = serde_json::Map::new();
        record.insert(
            self.config.primary_key.clone(),
            Value::String(key.to_string()),
        );
        self.create_item(ctx, key, Value::Object(record), true)
    }

    /// Re-trigger every group whose key list contains `key`, carrying the
    /// triggering job's `background` through to the group jobs.
    pub(crate) fn rebuild_groups_that_include(&self, _ctx: &Prism, key: &str, config: &UpdateConfig) {
        let groups: Vec<Group> = self
            .groups
            .read()
            .values()
            .filter(|group| group.has(key))
            .cloned()
            .collect();
        for group in groups {
            group.rebuild_with(UpdateConfig {
                background: config.background,
                ..UpdateConfig::default()
            });
        }
    }
}

/// A reactive set of records with grouped and selected views.
#[derive(Clone)]
pub struct Collection {
    ctx: Prism,
    core: Arc<CollectionCore>,
}

impl Collection {
    /// Create a collection with default configuration.
    pub fn new(ctx: &Prism) -> Self {
        Self::with_config(ctx, CollectionConfig::default())
    }

    /// Create a collection with explicit configuration.
    pub fn with_config(ctx: &Prism, config: CollectionConfig) -> Self {
        let collection = Self {
            ctx: ctx.clone(),
            core: Arc::new(CollectionCore {
                config,
                items: RwLock::new(IndexMap::new()),
                groups: RwLock::new(IndexMap::new()),
                selectors: RwLock::new(IndexMap::new()),
            }),
        };
        // The default group exists from the start so subscribers can attach
        // before any record arrives.
        let default_key = collection.core.config.default_group_key.clone();
        collection.ensure_group(&default_key);
        collection
    }

    /// The collection's diagnostic key, if any.
    pub fn key(&self) -> Option<String> {
        self.core.config.key.clone()
    }

    /// Collect one record or an array of records into the default group.
    pub fn collect(&self, data: Value) -> &Self {
        self.collect_with(data, &[])
    }

    /// Collect records into the named groups plus the default group.
    ///
    /// Records without the configured primary key are skipped with a warning.
    pub fn collect_with(&self, data: Value, group_keys: &[&str]) -> &Self {
        self.collect_with_config(data, group_keys, CollectConfig::default())
    }

    /// [`Collection::collect_with`] with explicit options: placement method
    /// for the target groups and a background override for both the record
    /// writes and the group jobs.
    pub fn collect_with_config(
        &self,
        data: Value,
        group_keys: &[&str],
        config: CollectConfig,
    ) -> &Self {
        let records = match data {
            Value::Array(records) => records,
            record => vec![record],
        };
        let background = config.background.unwrap_or(false);

        let mut collected: Vec<ItemKey> = Vec::new();
        for record in records {
            let Some(field) = record.get(&self.core.config.primary_key) else {
                warn!(
                    primary_key = %self.core.config.primary_key,
                    "record has no primary key; skipping"
                );
                continue;
            };
            let Some(key) = CollectionCore::item_key_from(field) else {
                warn!(
                    primary_key = %self.core.config.primary_key,
                    "primary key is not a string or number; skipping"
                );
                continue;
            };

            let existing = self.core.items.read().get(&key).cloned();
            match existing {
                Some(item) => {
                    // A placeholder becomes real the moment its record lands.
                    item.placeholder.store(false, Ordering::Relaxed);
                    item.state.set_with(
                        record,
                        UpdateConfig {
                            background,
                            ..UpdateConfig::default()
                        },
                    );
                }
                None => {
                    self.core.create_item(&self.ctx, &key, record, false);
                }
            }
            collected.push(key);
        }

        if collected.is_empty() {
            return self;
        }
        debug!(records = collected.len(), "collected records");

        let default_key = self.core.config.default_group_key.clone();
        let mut targets: Vec<String> = vec![default_key];
        targets.extend(group_keys.iter().map(|key| key.to_string()));
        let keys: Vec<&str> = collected.iter().map(String::as_str).collect();
        for group_key in targets {
            self.ensure_group(&group_key).add(
                &keys,
                GroupAddConfig {
                    method: config.method,
                    overwrite: false,
                    background: config.background,
                },
            );
        }
        self
    }

    /// Shallow-merge changes into an existing record.
    ///
    /// Changing the primary-key field re-keys the item across groups and
    /// selectors.
    pub fn update(&self, key: &str, changes: Value) -> &Self {
        self.update_with(key, changes, UpdateItemConfig::default())
    }

    /// [`Collection::update`] with explicit options: merge versus replace,
    /// and a background toggle.
    pub fn update_with(&self, key: &str, changes: Value, config: UpdateItemConfig) -> &Self {
        let Some(item) = self.core.items.read().get(key).cloned() else {
            warn!(key, "update on unknown item");
            return self;
        };

        let new_key = changes
            .get(&self.core.config.primary_key)
            .and_then(CollectionCore::item_key_from)
            .filter(|new_key| new_key != key);

        let job_config = UpdateConfig {
            background: config.background,
            ..UpdateConfig::default()
        };
        if config.patch {
            item.state.patch_with(changes, job_config);
        } else {
            item.state.set_with(changes, job_config);
        }

        if let Some(new_key) = new_key {
            self.update_item_key(key, &new_key);
        }
        self
    }

    /// Move an item to a new key, following it through groups and selectors.
    pub fn update_item_key(&self, old_key: &str, new_key: &str) -> &Self {
        let moved = {
            let mut items = self.core.items.write();
            match items.shift_remove(old_key) {
                Some(item) => {
                    items.insert(new_key.to_string(), item.clone());
                    Some(item)
                }
                None => None,
            }
        };
        let Some(item) = moved else {
            warn!(old_key, "update_item_key on unknown item");
            return self;
        };

        self.core.attach_group_hook(&item, new_key);

        // Keep the record's primary-key field consistent with the new key,
        // unless an earlier patch already wrote it.
        let recorded = item
            .state
            .raw_value()
            .get(&self.core.config.primary_key)
            .and_then(CollectionCore::item_key_from);
        if recorded.as_deref() != Some(new_key) {
            let mut changes = serde_json::Map::new();
            changes.insert(
                self.core.config.primary_key.clone(),
                Value::String(new_key.to_string()),
            );
            item.state.patch(Value::Object(changes));
        }

        let groups: Vec<Group> = self.core.groups.read().values().cloned().collect();
        for group in groups {
            group.replace_key(old_key, new_key);
        }

        let selectors: Vec<Selector> = self.core.selectors.read().values().cloned().collect();
        for selector in selectors {
            if selector.selected_key().as_deref() == Some(old_key) {
                selector.select_with(
                    new_key,
                    SelectConfig {
                        force: true,
                        ..SelectConfig::default()
                    },
                );
            }
        }
        self
    }

    /// Remove items from the collection, all groups and all selectors.
    ///
    /// Selectors pointing at a removed key fall back to a placeholder.
    pub fn remove_items(&self, keys: &[&str]) -> &Self {
        for key in keys {
            // Groups first, while the record still exists, so the removal
            // is visible rather than background-defaulted away.
            let groups: Vec<Group> = self.core.groups.read().values().cloned().collect();
            for group in groups {
                if group.has(key) {
                    group.remove(&[key], GroupRemoveConfig::default());
                }
            }

            let removed = self.core.items.write().shift_remove(*key);
            if removed.is_none() {
                warn!(key, "remove on unknown item");
                continue;
            }

            let selectors: Vec<Selector> = self.core.selectors.read().values().cloned().collect();
            for selector in selectors {
                if selector.selected_key().as_deref() == Some(*key) {
                    selector.select_with(
                        key,
                        SelectConfig {
                            force: true,
                            ..SelectConfig::default()
                        },
                    );
                }
            }
        }
        self
    }

    /// Remove item keys from specific groups only; the records stay.
    pub fn remove_from_groups(&self, keys: &[&str], group_keys: &[&str]) -> &Self {
        for group_key in group_keys {
            let group = self.core.groups.read().get(*group_key).cloned();
            match group {
                Some(group) => {
                    group.remove(keys, GroupRemoveConfig::default());
                }
                None => warn!(group = group_key, "remove_from_groups on unknown group"),
            }
        }
        self
    }

    /// Add already collected item keys to the named groups.
    pub fn put(&self, keys: &[&str], group_keys: &[&str]) -> &Self {
        for group_key in group_keys {
            self.ensure_group(group_key).add(keys, GroupAddConfig::default());
        }
        self
    }

    /// Look up a real item. Placeholders are invisible here.
    pub fn get_item(&self, key: &str) -> Option<Item> {
        self.core
            .items
            .read()
            .get(key)
            .filter(|item| !item.is_placeholder())
            .cloned()
    }

    /// Look up an item, creating a placeholder when none exists.
    pub fn get_item_or_create_placeholder(&self, key: &str) -> Item {
        self.core.item_or_placeholder(&self.ctx, key)
    }

    /// A record's value. Tracked like a state read.
    pub fn get_item_value(&self, key: &str) -> Option<Value> {
        self.get_item(key).map(|item| item.value())
    }

    /// Create a named group, reusing an existing one.
    pub fn create_group(&self, key: &str) -> Group {
        if let Some(existing) = self.core.groups.read().get(key) {
            warn!(group = key, "group already exists; reusing");
            return existing.clone();
        }
        self.ensure_group(key)
    }

    fn ensure_group(&self, key: &str) -> Group {
        if let Some(existing) = self.core.groups.read().get(key) {
            return existing.clone();
        }
        let group = Group::new(&self.ctx, Arc::downgrade(&self.core), key);
        self.core
            .groups
            .write()
            .insert(key.to_string(), group.clone());
        group
    }

    /// Look up a named group.
    pub fn get_group(&self, key: &str) -> Option<Group> {
        self.core.groups.read().get(key).cloned()
    }

    /// The group every collected record joins.
    pub fn default_group(&self) -> Group {
        self.ensure_group(&self.core.config.default_group_key)
    }

    /// Create a named selector pointing at `item_key`, reusing an existing
    /// one.
    pub fn create_selector(&self, key: &str, item_key: &str) -> Selector {
        if let Some(existing) = self.core.selectors.read().get(key) {
            warn!(selector = key, "selector already exists; reusing");
            return existing.clone();
        }
        let selector = Selector::new(&self.ctx, Arc::downgrade(&self.core), item_key);
        self.core
            .selectors
            .write()
            .insert(key.to_string(), selector.clone());
        selector
    }

    /// Look up a named selector.
    pub fn get_selector(&self, key: &str) -> Option<Selector> {
        self.core.selectors.read().get(key).cloned()
    }

    /// Keys of every real item, in insertion order.
    pub fn item_keys(&self) -> Vec<ItemKey> {
        self.core
            .items
            .read()
            .iter()
            .filter(|(_, item)| !item.is_placeholder())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of real items.
    pub fn size(&self) -> usize {
        self.core
            .items
            .read()
            .values()
            .filter(|item| !item.is_placeholder())
            .count()
    }

    /// Whether a real item exists for `key`.
    pub fn has_item(&self, key: &str) -> bool {
        self.core.has_real_item(key)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("key", &self.key())
            .field("items", &self.size())
            .field("groups", &self.core.groups.read().len())
            .field("selectors", &self.core.selectors.read().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
