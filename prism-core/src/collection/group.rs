//! Groups
//!
//! A Group is an ordered list of item keys over one collection, with the
//! matching record values materialized into an output array. The observer's
//! value is the key list itself; the output is a cache rebuilt by a side
//! effect whenever the key list commits.
//!
//! # Background Defaulting
//!
//! Adding or removing keys whose records do not exist in the collection is
//! an organizational change, not a visible one: when every touched key is
//! absent from the record table the job defaults to background (applied but
//! not notified). Any key backed by a real record makes the change visible.
//! An explicit `background` in the config always wins.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::{CollectionCore, Item, ItemKey};
use crate::context::Prism;
use crate::reactive::job::UpdateConfig;
use crate::reactive::observer::ObserverId;
use crate::state::{StateCore, StateObserver};

/// Where newly added keys land in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupAddMethod {
    /// At the end, in the order given.
    #[default]
    Append,
    /// At the front, in the order given.
    Prepend,
}

/// Options for [`Group::add`].
#[derive(Debug, Clone, Default)]
pub struct GroupAddConfig {
    pub method: GroupAddMethod,
    /// Re-position keys that are already in the list instead of skipping
    /// them.
    pub overwrite: bool,
    /// Override the computed background default.
    pub background: Option<bool>,
}

/// Options for [`Group::remove`].
#[derive(Debug, Clone, Default)]
pub struct GroupRemoveConfig {
    /// Override the computed background default.
    pub background: Option<bool>,
}

struct GroupCore {
    state: Arc<StateCore>,
    collection: Weak<CollectionCore>,
    /// Record values for the resolvable keys, in list order.
    output: RwLock<Vec<Value>>,
    /// The resolved items behind `output`.
    items: RwLock<Vec<Item>>,
    /// Keys in the list with no real record behind them.
    not_found: RwLock<Vec<ItemKey>>,
}

impl GroupCore {
    /// Resolve the committed key list against the record table and refresh
    /// the cached output. Placeholders count as missing.
    fn rebuild_output(&self, ctx: &Prism) {
        let keys = keys_from(&ctx.graph().value(self.state.observer));
        let Some(collection) = self.collection.upgrade() else {
            return;
        };

        let mut output = Vec::with_capacity(keys.len());
        let mut items = Vec::with_capacity(keys.len());
        let mut not_found = Vec::new();
        {
            let table = collection.items.read();
            for key in keys {
                match table.get(&key) {
                    Some(item) if !item.is_placeholder() => {
                        output.push(item.raw_value());
                        items.push(item.clone());
                    }
                    _ => not_found.push(key),
                }
            }
        }

        if !not_found.is_empty() {
            warn!(
                observer = self.state.observer.raw(),
                missing = not_found.len(),
                "group references keys with no record"
            );
        }
        *self.output.write() = output;
        *self.items.write() = items;
        *self.not_found.write() = not_found;
    }
}

/// An ordered, reactive slice of a collection.
#[derive(Clone)]
pub struct Group {
    ctx: Prism,
    core: Arc<GroupCore>,
}

impl Group {
    pub(crate) fn new(ctx: &Prism, collection: Weak<CollectionCore>, name: &str) -> Self {
        let observer = ctx
            .graph()
            .create_observer(Some(name.to_string()), Value::Array(Vec::new()));
        let state = StateCore::new(observer, Value::Array(Vec::new()));
        ctx.graph().register_behavior(
            observer,
            Arc::new(StateObserver {
                core: Arc::clone(&state),
            }),
        );

        let core = Arc::new(GroupCore {
            state,
            collection,
            output: RwLock::new(Vec::new()),
            items: RwLock::new(Vec::new()),
            not_found: RwLock::new(Vec::new()),
        });

        let weak = Arc::downgrade(&core);
        core.state.add_side_effect("rebuild", move |ctx, _config| {
            if let Some(core) = weak.upgrade() {
                core.rebuild_output(ctx);
            }
        });

        Self {
            ctx: ctx.clone(),
            core,
        }
    }

    /// The underlying observer id.
    pub fn observer(&self) -> ObserverId {
        self.core.state.observer
    }

    /// Add keys to the list.
    ///
    /// Keys already present are skipped unless `overwrite` re-positions
    /// them.
    pub fn add(&self, keys: &[&str], config: GroupAddConfig) -> &Self {
        let mut list = self.keys();
        let mut touched: Vec<ItemKey> = Vec::new();
        let mut incoming: Vec<ItemKey> = Vec::new();

        for key in keys {
            let key = key.to_string();
            if list.contains(&key) {
                if config.overwrite {
                    list.retain(|existing| *existing != key);
                    incoming.push(key.clone());
                    touched.push(key);
                } else {
                    debug!(%key, "key already in group; skipping");
                }
            } else {
                incoming.push(key.clone());
                touched.push(key);
            }
        }
        if incoming.is_empty() {
            return self;
        }

        match config.method {
            GroupAddMethod::Append => list.extend(incoming),
            GroupAddMethod::Prepend => {
                for (position, key) in incoming.into_iter().enumerate() {
                    list.insert(position, key);
                }
            }
        }

        let background = config
            .background
            .unwrap_or_else(|| self.all_without_record(&touched));
        self.ingest_keys(list, background);
        self
    }

    /// Remove keys from the list.
    pub fn remove(&self, keys: &[&str], config: GroupRemoveConfig) -> &Self {
        let list = self.keys();
        let removed: Vec<ItemKey> = keys.iter().map(|key| key.to_string()).collect();
        let remaining: Vec<ItemKey> = list
            .iter()
            .filter(|key| !removed.contains(key))
            .cloned()
            .collect();
        if remaining.len() == list.len() {
            return self;
        }

        let background = config
            .background
            .unwrap_or_else(|| self.all_without_record(&removed));
        self.ingest_keys(remaining, background);
        self
    }

    /// Swap one key for another in place, preserving its position.
    pub(crate) fn replace_key(&self, old_key: &str, new_key: &str) {
        let list = self.keys();
        if !list.iter().any(|key| key == old_key) {
            return;
        }
        let replaced: Vec<ItemKey> = list
            .into_iter()
            .map(|key| {
                if key == old_key {
                    new_key.to_string()
                } else {
                    key
                }
            })
            .collect();
        self.ingest_keys(replaced, false);
    }

    /// Re-commit the current key list, refreshing the output even though the
    /// list itself is unchanged.
    pub fn rebuild(&self) -> &Self {
        self.rebuild_with(UpdateConfig::default())
    }

    /// [`Group::rebuild`] with explicit options. The ingest is always forced;
    /// `background` carries through so a silent item mutation stays silent at
    /// the group level.
    pub fn rebuild_with(&self, config: UpdateConfig) -> &Self {
        let current = self.ctx.graph().value(self.core.state.observer);
        self.core.state.ingest_value(
            &self.ctx,
            current,
            UpdateConfig {
                force: true,
                ..config
            },
        );
        self
    }

    /// True when none of `keys` has a real record in the collection.
    fn all_without_record(&self, keys: &[ItemKey]) -> bool {
        match self.core.collection.upgrade() {
            Some(collection) => keys.iter().all(|key| !collection.has_real_item(key)),
            None => true,
        }
    }

    fn ingest_keys(&self, keys: Vec<ItemKey>, background: bool) {
        let value = Value::Array(keys.into_iter().map(Value::String).collect());
        self.core.state.ingest_value(
            &self.ctx,
            value,
            UpdateConfig {
                background,
                ..UpdateConfig::default()
            },
        );
    }

    /// The key list, without dependency tracking.
    pub fn keys(&self) -> Vec<ItemKey> {
        keys_from(&self.ctx.graph().value(self.core.state.observer))
    }

    /// The materialized record values. Tracked like a state read.
    pub fn output(&self) -> Vec<Value> {
        self.ctx.tracker().tracked(self.core.state.observer);
        self.core.output.read().clone()
    }

    /// The resolved items behind [`Group::output`]. Tracked.
    pub fn items(&self) -> Vec<Item> {
        self.ctx.tracker().tracked(self.core.state.observer);
        self.core.items.read().clone()
    }

    /// Keys in the list that resolved to no record on the last rebuild.
    pub fn missing_keys(&self) -> Vec<ItemKey> {
        self.core.not_found.read().clone()
    }

    /// Whether the list contains `key`.
    pub fn has(&self, key: &str) -> bool {
        self.keys().iter().any(|existing| existing == key)
    }

    /// Length of the key list.
    pub fn size(&self) -> usize {
        self.keys().len()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("observer", &self.core.state.observer.raw())
            .field("keys", &self.keys())
            .field("missing", &self.missing_keys().len())
            .finish()
    }
}

fn keys_from(value: &Value) -> Vec<ItemKey> {
    match value {
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| entry.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
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
    fn append_and_prepend_ordering() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]));
        let group = todos.create_group("ordered");

        group.add(&["2", "3"], GroupAddConfig::default());
        assert_eq!(group.keys(), vec!["2", "3"]);

        group.add(
            &["1", "4"],
            GroupAddConfig {
                method: GroupAddMethod::Prepend,
                ..GroupAddConfig::default()
            },
        );
        assert_eq!(group.keys(), vec!["1", "4", "2", "3"]);
    }

    #[test]
    fn duplicate_keys_are_skipped_without_overwrite() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!([{"id": 1}, {"id": 2}]));
        let group = todos.default_group();

        group.add(&["1"], GroupAddConfig::default());
        assert_eq!(group.keys(), vec!["1", "2"]);
    }

    #[test]
    fn overwrite_repositions_an_existing_key() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!([{"id": 1}, {"id": 2}, {"id": 3}]));
        let group = todos.default_group();

        group.add(
            &["1"],
            GroupAddConfig {
                overwrite: true,
                ..GroupAddConfig::default()
            },
        );
        assert_eq!(group.keys(), vec!["2", "3", "1"]);
    }

    #[test]
    fn output_resolves_records_in_list_order() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!([{"id": 1, "n": "a"}, {"id": 2, "n": "b"}]));
        let group = todos.create_group("view");

        group.add(&["2", "1"], GroupAddConfig::default());

        assert_eq!(
            group.output(),
            vec![json!({"id": 2, "n": "b"}), json!({"id": 1, "n": "a"})]
        );
        assert_eq!(group.items().len(), 2);
    }

    #[test]
    fn unresolvable_keys_land_in_missing() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!({"id": 1}));
        let group = todos.create_group("partial");

        group.add(&["1", "ghost"], GroupAddConfig::default());

        assert_eq!(group.output(), vec![json!({"id": 1})]);
        assert_eq!(group.missing_keys(), vec!["ghost"]);

        // Once the record arrives the rebuild resolves it.
        todos.collect(json!({"id": "ghost"}));
        group.rebuild();
        assert!(group.missing_keys().is_empty());
        assert_eq!(group.size(), 2);
    }

    #[test]
    fn remove_drops_keys_and_keeps_order() {
        let ctx = Prism::new();
        let todos = ctx.collection();
        todos.collect(json!([{"id": 1}, {"id": 2}, {"id": 3}]));
        let group = todos.default_group();

        group.remove(&["2"], GroupRemoveConfig::default());

        assert_eq!(group.keys(), vec!["1", "3"]);
        assert_eq!(group.output(), vec![json!({"id": 1}), json!({"id": 3})]);
    }
}
