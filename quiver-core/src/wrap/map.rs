//! Map façade: arbitrary keys.
//!
//! Entries are tracked per key. Enumeration is split in two: `keys()`
//! depends only on which keys exist, while `values()`, `entries()`,
//! `for_each()` and `size()` also depend on the values, so overwriting an
//! entry re-runs the latter but not the former.
//!
//! Keys are compared with SameValueZero and stored raw; a façade used as a
//! key addresses the same entry as its raw target.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Facade, Observable};
use crate::error::ReactiveError;
use crate::graph::{FieldKey, MutationKind};
use crate::value::{Target, TargetData, Value};

fn entries(data: &mut TargetData) -> &mut IndexMap<Value, Value> {
    match data {
        TargetData::Map(entries) => entries,
        other => unreachable!("map façade over a {} target", other.shape()),
    }
}

/// Reactive view of a map target.
#[derive(Clone)]
pub struct ReactiveMap {
    facade: Arc<Facade>,
}

impl ReactiveMap {
    pub(crate) fn from_facade(facade: Arc<Facade>) -> Self {
        Self { facade }
    }

    pub(crate) fn facade(&self) -> &Arc<Facade> {
        &self.facade
    }

    /// The raw target behind this façade.
    pub fn target(&self) -> &Target {
        self.facade.target()
    }

    pub fn is_readonly(&self) -> bool {
        self.facade.flags().readonly
    }

    /// Tracked lookup. Missing entries read as `Null`; composite values come
    /// back wrapped unless the façade is shallow.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        let key = key.into().to_raw();
        self.facade.track(FieldKey::Entry(key.clone()));
        let raw = entries(&mut self.target().lock()).get(&key).cloned();
        self.facade.wrap_out(raw.unwrap_or_default())
    }

    /// Write one entry. A new key also invalidates enumeration.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<(), ReactiveError> {
        let key = key.into().to_raw();
        self.facade.check_writable(&key)?;

        let value = value.into().to_raw();
        let kind = match entries(&mut self.target().lock()).insert(key.clone(), value.clone()) {
            None => Some(MutationKind::Add),
            Some(old) if !old.same_value_zero(&value) => Some(MutationKind::Set),
            Some(_) => None,
        };

        if let Some(kind) = kind {
            self.facade.trigger(FieldKey::Entry(key), kind);
        }
        Ok(())
    }

    /// Tracked check for an entry.
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = key.into().to_raw();
        self.facade.track(FieldKey::Entry(key.clone()));
        entries(&mut self.target().lock()).contains_key(&key)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn delete(&self, key: impl Into<Value>) -> Result<bool, ReactiveError> {
        let key = key.into().to_raw();
        self.facade.check_writable(&key)?;

        let existed = entries(&mut self.target().lock())
            .shift_remove(&key)
            .is_some();
        if existed {
            self.facade.trigger(FieldKey::Entry(key), MutationKind::Delete);
        }
        Ok(existed)
    }

    /// Number of entries. Depends on every add and delete.
    pub fn size(&self) -> usize {
        self.facade.track(FieldKey::Iterate);
        self.target().len_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove every entry, invalidating every reader of the map.
    pub fn clear(&self) -> Result<(), ReactiveError> {
        self.facade.check_writable("*")?;

        let had_entries = {
            let mut data = self.target().lock();
            let entries = entries(&mut data);
            let had_entries = !entries.is_empty();
            entries.clear();
            had_entries
        };
        if had_entries {
            self.facade.trigger(FieldKey::Iterate, MutationKind::Clear);
        }
        Ok(())
    }

    /// Keys in insertion order. Not invalidated by value overwrites.
    pub fn keys(&self) -> Vec<Value> {
        self.facade.track(FieldKey::KeyIterate);
        let keys: Vec<Value> = entries(&mut self.target().lock()).keys().cloned().collect();
        keys.into_iter().map(|key| self.facade.wrap_out(key)).collect()
    }

    /// Tracked snapshot of the values, in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.entries()
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }

    /// Tracked snapshot of the entries, in insertion order.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.facade.track(FieldKey::Iterate);
        let snapshot: Vec<(Value, Value)> = entries(&mut self.target().lock())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(key, value)| (self.facade.wrap_out(key), self.facade.wrap_out(value)))
            .collect()
    }

    /// Call `f(key, value)` for every entry, in insertion order.
    ///
    /// Works on a snapshot, so `f` may write to the map.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Value, &Value),
    {
        for (key, value) in self.entries() {
            f(&key, &value);
        }
    }

    /// Untracked, cycle-safe JSON snapshot. Keys are rendered as strings.
    pub fn to_json(&self) -> serde_json::Value {
        self.target().to_json()
    }
}

impl Observable for ReactiveMap {
    fn read(&self, key: &Value) -> Value {
        self.get(key.clone())
    }

    fn write(&self, key: Value, value: Value) -> Result<(), ReactiveError> {
        self.set(key, value)
    }

    fn has(&self, key: &Value) -> bool {
        ReactiveMap::has(self, key.clone())
    }

    fn keys(&self) -> Vec<Value> {
        ReactiveMap::keys(self)
    }

    fn delete(&self, key: &Value) -> Result<bool, ReactiveError> {
        ReactiveMap::delete(self, key.clone())
    }
}

impl fmt::Debug for ReactiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveMap")
            .field("target", self.target())
            .field("flags", &self.facade.flags())
            .finish()
    }
}
