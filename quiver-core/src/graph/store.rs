//! Subscription Store
//!
//! Maps `(target, field key)` pairs to the set of computations subscribed to
//! that slot.
//!
//! # Layout
//!
//! ```text
//! TargetId ──► FieldKey ──► DepSet { ComputationId ──► computation }
//! ```
//!
//! Each computation keeps the reverse edge, a list of weak references to the
//! `DepSet`s it joined, so that it can leave all of them in O(k) before it
//! re-runs. The store owns the sets; computations only point at them. A
//! target that is released drops its sets, and computations skip the dead
//! weak references on their next cleanup.
//!
//! The store never holds targets. It is keyed by [`TargetId`], so a target
//! can be dropped while subscriptions to it remain recorded until
//! [`Engine::release`](crate::Engine::release) is called or the engine is
//! dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::reactive::{ComputationId, ComputationRef};
use crate::value::{Shape, TargetId, Value};

/// Discriminator for one observable slot of a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    /// A named record field.
    Prop(Arc<str>),
    /// A list index.
    Index(usize),
    /// A map entry, keyed by the raw key value.
    Entry(Value),
    /// The length of a list.
    Length,
    /// The enumeration of a target's keys or values.
    Iterate,
    /// The enumeration of a map's keys only.
    KeyIterate,
}

impl FieldKey {
    /// Key of a named record field.
    pub fn prop(name: &str) -> Self {
        FieldKey::Prop(Arc::from(name))
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Prop(name) => write!(f, ".{name}"),
            FieldKey::Index(index) => write!(f, "[{index}]"),
            FieldKey::Entry(key) => write!(f, "<{key}>"),
            FieldKey::Length => f.write_str("length"),
            FieldKey::Iterate => f.write_str("<iterate>"),
            FieldKey::KeyIterate => f.write_str("<key-iterate>"),
        }
    }
}

/// The kind of write being propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// An existing slot changed value.
    Set,
    /// A new slot was created.
    Add,
    /// A slot was removed.
    Delete,
    /// Every slot was removed.
    Clear,
}

/// One slot change inside an invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: FieldKey,
    pub kind: MutationKind,
}

impl Change {
    /// One slot written with the given kind of mutation.
    pub fn new(key: FieldKey, kind: MutationKind) -> Self {
        Self { key, kind }
    }
}

/// The subscribers of a single `(target, key)` slot.
pub(crate) struct DepSet {
    key: FieldKey,
    subscribers: Mutex<IndexMap<ComputationId, ComputationRef>>,
}

impl DepSet {
    fn new(key: FieldKey) -> Self {
        Self {
            key,
            subscribers: Mutex::new(IndexMap::new()),
        }
    }

    /// Add `computation` and record the reverse edge on it.
    ///
    /// Returns `false` if it was already subscribed.
    pub(crate) fn subscribe(self: &Arc<Self>, computation: &ComputationRef) -> bool {
        let id = computation.state().id();
        let inserted = self
            .subscribers
            .lock()
            .insert(id, Arc::clone(computation))
            .is_none();

        if inserted {
            computation.state().link(Arc::downgrade(self));
        }
        inserted
    }

    pub(crate) fn unsubscribe(&self, id: ComputationId) {
        // Dropped after the lock is released.
        let removed = self.subscribers.lock().swap_remove(&id);
        drop(removed);
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn collect_into(&self, out: &mut IndexMap<ComputationId, ComputationRef>) {
        for (id, computation) in self.subscribers.lock().iter() {
            out.entry(*id).or_insert_with(|| Arc::clone(computation));
        }
    }
}

impl fmt::Debug for DepSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepSet")
            .field("key", &self.key)
            .field("subscribers", &self.len())
            .finish()
    }
}

pub(crate) type DepsMap = HashMap<FieldKey, Arc<DepSet>>;

fn select(deps: &DepsMap, key: &FieldKey, selected: &mut IndexMap<ComputationId, ComputationRef>) {
    if let Some(dep) = deps.get(key) {
        dep.collect_into(selected);
    }
}

/// Target → key → subscriber set.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionStore {
    targets: HashMap<TargetId, DepsMap>,
}

impl SubscriptionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Get the subscriber set of a slot, creating it if needed.
    pub(crate) fn dep_set(&mut self, target: TargetId, key: FieldKey) -> Arc<DepSet> {
        let deps = self.targets.entry(target).or_default();
        Arc::clone(
            deps.entry(key.clone())
                .or_insert_with(|| Arc::new(DepSet::new(key))),
        )
    }

    /// Snapshot the computations affected by `changes` on `target`.
    ///
    /// The union covers, per change:
    /// - subscribers of the exact key
    /// - on ADD/DELETE, subscribers of the iteration key
    /// - on ADD to a list, subscribers of the length key
    /// - on any write to a map, subscribers of the iteration key, and on
    ///   ADD/DELETE also the key-iteration key
    /// - on CLEAR, every subscriber of the target
    ///
    /// `truncate_from` additionally selects every index key at or beyond the
    /// given position, for list truncation. The `exclude`d computation (the
    /// one currently running) is never selected.
    ///
    /// A target with no recorded subscribers yields an empty snapshot.
    pub(crate) fn collect(
        &self,
        target: TargetId,
        shape: Shape,
        changes: &[Change],
        truncate_from: Option<usize>,
        exclude: Option<ComputationId>,
    ) -> Vec<ComputationRef> {
        let Some(deps) = self.targets.get(&target) else {
            return Vec::new();
        };

        let mut selected = IndexMap::new();

        for change in changes {
            if change.kind == MutationKind::Clear {
                for dep in deps.values() {
                    dep.collect_into(&mut selected);
                }
                continue;
            }

            select(deps, &change.key, &mut selected);

            let structural = matches!(change.kind, MutationKind::Add | MutationKind::Delete);
            match shape {
                Shape::Map => {
                    select(deps, &FieldKey::Iterate, &mut selected);
                    if structural {
                        select(deps, &FieldKey::KeyIterate, &mut selected);
                    }
                }
                Shape::List => {
                    if structural {
                        select(deps, &FieldKey::Iterate, &mut selected);
                    }
                    if change.kind == MutationKind::Add {
                        select(deps, &FieldKey::Length, &mut selected);
                    }
                }
                Shape::Record => {
                    if structural {
                        select(deps, &FieldKey::Iterate, &mut selected);
                    }
                }
            }
        }

        if let Some(from) = truncate_from {
            for (key, dep) in deps {
                if matches!(key, FieldKey::Index(index) if *index >= from) {
                    dep.collect_into(&mut selected);
                }
            }
        }

        if let Some(id) = exclude {
            selected.swap_remove(&id);
        }
        selected.into_values().collect()
    }

    /// Detach every subscriber set of `target`.
    ///
    /// The sets are returned so the caller can drop them after releasing the
    /// store lock.
    pub(crate) fn release(&mut self, target: TargetId) -> Option<DepsMap> {
        self.targets.remove(&target)
    }

    pub(crate) fn subscriber_count(&self, target: TargetId, key: &FieldKey) -> usize {
        self.targets
            .get(&target)
            .and_then(|deps| deps.get(key))
            .map(|dep| dep.len())
            .unwrap_or(0)
    }

    pub(crate) fn target_count(&self) -> usize {
        self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::testing::idle_computation;

    fn ids(computations: &[ComputationRef]) -> Vec<ComputationId> {
        computations.iter().map(|c| c.state().id()).collect()
    }

    #[test]
    fn subscribe_links_both_directions() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let computation = idle_computation();

        let dep = store.dep_set(target, FieldKey::prop("a"));
        assert!(dep.subscribe(&computation));
        assert!(!dep.subscribe(&computation));

        assert_eq!(store.subscriber_count(target, &FieldKey::prop("a")), 1);
        assert_eq!(computation.state().dependency_count(), 1);

        computation.state().cleanup();
        assert_eq!(store.subscriber_count(target, &FieldKey::prop("a")), 0);
        assert_eq!(computation.state().dependency_count(), 0);
    }

    #[test]
    fn missing_target_is_a_no_op() {
        let store = SubscriptionStore::new();
        let changes = [Change::new(FieldKey::prop("a"), MutationKind::Set)];
        assert!(store
            .collect(TargetId::new(), Shape::Record, &changes, None, None)
            .is_empty());
    }

    #[test]
    fn set_on_record_skips_iteration_subscribers() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let reader = idle_computation();
        let enumerator = idle_computation();

        store.dep_set(target, FieldKey::prop("a")).subscribe(&reader);
        store.dep_set(target, FieldKey::Iterate).subscribe(&enumerator);

        let set = [Change::new(FieldKey::prop("a"), MutationKind::Set)];
        assert_eq!(
            ids(&store.collect(target, Shape::Record, &set, None, None)),
            vec![reader.state().id()]
        );

        let add = [Change::new(FieldKey::prop("b"), MutationKind::Add)];
        assert_eq!(
            ids(&store.collect(target, Shape::Record, &add, None, None)),
            vec![enumerator.state().id()]
        );
    }

    #[test]
    fn add_to_list_selects_length_subscribers() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let length_reader = idle_computation();

        store.dep_set(target, FieldKey::Length).subscribe(&length_reader);

        let add = [Change::new(FieldKey::Index(3), MutationKind::Add)];
        assert_eq!(store.collect(target, Shape::List, &add, None, None).len(), 1);

        let set = [Change::new(FieldKey::Index(0), MutationKind::Set)];
        assert!(store.collect(target, Shape::List, &set, None, None).is_empty());
    }

    #[test]
    fn map_set_selects_value_iteration_but_not_key_iteration() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let values_reader = idle_computation();
        let keys_reader = idle_computation();

        store.dep_set(target, FieldKey::Iterate).subscribe(&values_reader);
        store.dep_set(target, FieldKey::KeyIterate).subscribe(&keys_reader);

        let set = [Change::new(FieldKey::Entry(Value::from("k")), MutationKind::Set)];
        assert_eq!(
            ids(&store.collect(target, Shape::Map, &set, None, None)),
            vec![values_reader.state().id()]
        );

        let delete = [Change::new(FieldKey::Entry(Value::from("k")), MutationKind::Delete)];
        assert_eq!(store.collect(target, Shape::Map, &delete, None, None).len(), 2);
    }

    #[test]
    fn truncation_selects_indices_at_or_beyond_new_length() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let low = idle_computation();
        let high = idle_computation();

        store.dep_set(target, FieldKey::Index(0)).subscribe(&low);
        store.dep_set(target, FieldKey::Index(5)).subscribe(&high);

        let shrink = [Change::new(FieldKey::Length, MutationKind::Set)];
        assert_eq!(
            ids(&store.collect(target, Shape::List, &shrink, Some(2), None)),
            vec![high.state().id()]
        );
    }

    #[test]
    fn clear_selects_everything_and_union_is_deduplicated() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let computation = idle_computation();

        store.dep_set(target, FieldKey::prop("a")).subscribe(&computation);
        store.dep_set(target, FieldKey::prop("b")).subscribe(&computation);

        let clear = [Change::new(FieldKey::Iterate, MutationKind::Clear)];
        assert_eq!(store.collect(target, Shape::Record, &clear, None, None).len(), 1);
    }

    #[test]
    fn excluded_computation_is_never_selected() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let computation = idle_computation();

        store.dep_set(target, FieldKey::prop("a")).subscribe(&computation);

        let set = [Change::new(FieldKey::prop("a"), MutationKind::Set)];
        let exclude = Some(computation.state().id());
        assert!(store
            .collect(target, Shape::Record, &set, None, exclude)
            .is_empty());
    }

    #[test]
    fn release_drops_target_entries() {
        let mut store = SubscriptionStore::new();
        let target = TargetId::new();
        let computation = idle_computation();

        store.dep_set(target, FieldKey::prop("a")).subscribe(&computation);
        assert_eq!(store.target_count(), 1);

        assert!(store.release(target).is_some());
        assert!(store.release(target).is_none());
        assert_eq!(store.target_count(), 0);

        // The weak reverse edge is dead; cleanup just skips it.
        computation.state().cleanup();
        assert_eq!(computation.state().dependency_count(), 0);
    }
}
