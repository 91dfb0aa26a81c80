//! List façade: index-addressed sequences.
//!
//! Single-slot reads and writes behave like record fields keyed by index,
//! with one extra slot, the length. Appending a new index invalidates length
//! readers; shrinking the length invalidates every index that fell off.
//!
//! # Bulk methods
//!
//! `push`, `pop`, `shift`, `unshift`, `splice` and `clear` read and write the
//! length internally. They run with tracking suspended, so calling one from
//! inside an effect does not make that effect depend on the list, and two
//! effects appending to the same list do not re-trigger each other forever.
//! Each bulk method compares the part of the storage it can touch, before
//! and after, and invalidates exactly the slots that changed, in one batch.
//! `push` and `pop` only look at the tail, so appending stays O(1).
//!
//! Index and length writes that would grow the list past
//! [`EngineConfig::max_list_len`](crate::EngineConfig::max_list_len) are
//! rejected.
//!
//! # Search
//!
//! `includes`, `index_of` and `last_index_of` search the wrapped view first
//! and then the raw storage, so a raw element is found even though reads
//! hand back its façade.

use std::fmt;
use std::sync::Arc;

use super::{Facade, Observable};
use crate::error::ReactiveError;
use crate::graph::{Change, FieldKey, MutationKind};
use crate::value::{Shape, Target, TargetData, Value};

fn items(data: &mut TargetData) -> &mut Vec<Value> {
    match data {
        TargetData::List(items) => items,
        other => unreachable!("list façade over a {} target", other.shape()),
    }
}

/// Slot changes between two versions of the tail of a list starting at
/// `offset`.
fn diff(offset: usize, before: &[Value], after: &[Value]) -> Vec<Change> {
    let index = |i: usize| FieldKey::Index(offset + i);
    let shared = before.len().min(after.len());
    let mut changes: Vec<Change> = (0..shared)
        .filter(|&i| !before[i].same_value_zero(&after[i]))
        .map(|i| Change::new(index(i), MutationKind::Set))
        .collect();

    changes.extend((shared..after.len()).map(|i| Change::new(index(i), MutationKind::Add)));
    changes.extend((shared..before.len()).map(|i| Change::new(index(i), MutationKind::Delete)));
    if after.len() < before.len() {
        changes.push(Change::new(FieldKey::Length, MutationKind::Set));
    }
    changes
}

/// Reactive view of a list target.
#[derive(Clone)]
pub struct ReactiveList {
    facade: Arc<Facade>,
}

impl ReactiveList {
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

    /// Tracked read of one element. Out-of-range reads are `Null`.
    pub fn get(&self, index: usize) -> Value {
        self.facade.track(FieldKey::Index(index));
        let raw = items(&mut self.target().lock()).get(index).cloned();
        self.facade.wrap_out(raw.unwrap_or_default())
    }

    /// Tracked length.
    pub fn len(&self) -> usize {
        self.facade.track(FieldKey::Length);
        self.target().len_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one element. Writing past the end extends the list, filling the
    /// gap with `Null`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), ReactiveError> {
        self.facade.check_writable(index)?;

        let value = value.into().to_raw();
        let kind = {
            let mut data = self.target().lock();
            let items = items(&mut data);
            if index < items.len() {
                let old = std::mem::replace(&mut items[index], value.clone());
                (!old.same_value_zero(&value)).then_some(MutationKind::Set)
            } else {
                self.facade.check_list_len(index.saturating_add(1))?;
                items.resize(index, Value::Null);
                items.push(value);
                Some(MutationKind::Add)
            }
        };

        if let Some(kind) = kind {
            self.facade.trigger(FieldKey::Index(index), kind);
        }
        Ok(())
    }

    /// Write the length. Shrinking drops trailing elements and invalidates
    /// their readers; growing pads with `Null`.
    pub fn set_len(&self, len: usize) -> Result<(), ReactiveError> {
        self.facade.check_writable("length")?;

        let old_len = {
            let mut data = self.target().lock();
            let items = items(&mut data);
            let old_len = items.len();
            if len > old_len {
                self.facade.check_list_len(len)?;
            }
            items.resize(len, Value::Null);
            old_len
        };

        if len != old_len {
            let truncate_from = (len < old_len).then_some(len);
            self.facade.trigger_batch(
                &[Change::new(FieldKey::Length, MutationKind::Set)],
                truncate_from,
            );
        }
        Ok(())
    }

    /// Tracked check that `index` holds an element.
    pub fn has(&self, index: usize) -> bool {
        self.facade.track(FieldKey::Index(index));
        index < self.target().len_raw()
    }

    /// Valid indices. Subscribes to the length.
    pub fn keys(&self) -> Vec<usize> {
        (0..self.len()).collect()
    }

    /// Every element, each read tracked.
    pub fn to_vec(&self) -> Vec<Value> {
        (0..self.len()).map(|index| self.get(index)).collect()
    }

    /// Reset one element to `Null`, keeping the length. Returns whether the
    /// index existed.
    pub fn delete(&self, index: usize) -> Result<bool, ReactiveError> {
        self.facade.check_writable(index)?;

        let existed = {
            let mut data = self.target().lock();
            match items(&mut data).get_mut(index) {
                Some(slot) => {
                    *slot = Value::Null;
                    true
                }
                None => false,
            }
        };
        if existed {
            self.facade.trigger(FieldKey::Index(index), MutationKind::Delete);
        }
        Ok(existed)
    }

    // ---- Search ----

    /// Whether `needle` is an element, with `NaN` matching `NaN`.
    pub fn includes(&self, needle: &Value) -> bool {
        self.search(needle, true, false).is_some()
    }

    /// First index of `needle` under strict equality (`NaN` never matches).
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.search(needle, false, false)
    }

    /// Last index of `needle` under strict equality.
    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        self.search(needle, false, true)
    }

    fn search(&self, needle: &Value, nan_equal: bool, from_end: bool) -> Option<usize> {
        let find = |values: &[Value], needle: &Value| {
            let matches = |value: &Value| value.identical(needle, nan_equal);
            if from_end {
                values.iter().rposition(matches)
            } else {
                values.iter().position(matches)
            }
        };

        let view = self.to_vec();
        if let Some(index) = find(&view, needle) {
            return Some(index);
        }

        let raw = items(&mut self.target().lock()).clone();
        find(&raw, &needle.to_raw())
    }

    // ---- Bulk methods ----

    /// Apply `op` to the storage with tracking suspended, then invalidate
    /// whatever changed.
    ///
    /// `from` maps the current length to the first index `op` may touch;
    /// only the tail from there on is compared.
    fn commit<R, S, F>(&self, from: S, op: F) -> Result<R, ReactiveError>
    where
        S: FnOnce(usize) -> usize,
        F: FnOnce(&mut Vec<Value>) -> R,
    {
        self.facade.check_writable("length")?;
        let _quiet = self.facade.suspend_tracking();

        let (result, start, before, after) = {
            let mut data = self.target().lock();
            let items = items(&mut data);
            let start = from(items.len()).min(items.len());
            let before = items[start..].to_vec();
            let result = op(items);
            let after = items.get(start..).map(<[Value]>::to_vec).unwrap_or_default();
            (result, start, before, after)
        };

        self.facade.trigger_batch(&diff(start, &before, &after), None);
        Ok(result)
    }

    /// Append an element. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize, ReactiveError> {
        let value = value.into().to_raw();
        self.commit(
            |len| len,
            |items| {
                items.push(value);
                items.len()
            },
        )
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Option<Value>, ReactiveError> {
        let popped = self.commit(|len| len.saturating_sub(1), |items| items.pop())?;
        Ok(popped.map(|value| self.facade.wrap_out(value)))
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Result<Option<Value>, ReactiveError> {
        let shifted = self.commit(|_| 0, |items| (!items.is_empty()).then(|| items.remove(0)))?;
        Ok(shifted.map(|value| self.facade.wrap_out(value)))
    }

    /// Prepend an element. Returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize, ReactiveError> {
        let value = value.into().to_raw();
        self.commit(
            |_| 0,
            |items| {
                items.insert(0, value);
                items.len()
            },
        )
    }

    /// Remove `delete_count` elements at `start` and insert `insert` in their
    /// place. Both bounds are clamped to the list. Returns the removed
    /// elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: Vec<Value>,
    ) -> Result<Vec<Value>, ReactiveError> {
        let insert: Vec<Value> = insert.iter().map(Value::to_raw).collect();
        let removed = self.commit(
            |len| start.min(len),
            |items| {
                let start = start.min(items.len());
                let end = start.saturating_add(delete_count).min(items.len());
                items.splice(start..end, insert).collect::<Vec<_>>()
            },
        )?;
        Ok(removed
            .into_iter()
            .map(|value| self.facade.wrap_out(value))
            .collect())
    }

    /// Remove every element.
    pub fn clear(&self) -> Result<(), ReactiveError> {
        self.commit(|_| 0, |items| items.clear())
    }

    /// Untracked, cycle-safe JSON snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        self.target().to_json()
    }
}

impl Observable for ReactiveList {
    fn read(&self, key: &Value) -> Value {
        match key.as_index() {
            Some(index) => self.get(index),
            None if key.as_str() == Some("length") => Value::from(self.len()),
            None => Value::Null,
        }
    }

    fn write(&self, key: Value, value: Value) -> Result<(), ReactiveError> {
        match key.as_index() {
            Some(index) => self.set(index, value),
            None if key.as_str() == Some("length") => match value.as_index() {
                Some(len) => self.set_len(len),
                None => Err(ReactiveError::invalid_key(value, Shape::List)),
            },
            None => Err(ReactiveError::invalid_key(key, Shape::List)),
        }
    }

    fn has(&self, key: &Value) -> bool {
        key.as_index()
            .is_some_and(|index| ReactiveList::has(self, index))
    }

    fn keys(&self) -> Vec<Value> {
        ReactiveList::keys(self).into_iter().map(Value::from).collect()
    }

    fn delete(&self, key: &Value) -> Result<bool, ReactiveError> {
        match key.as_index() {
            Some(index) => ReactiveList::delete(self, index),
            None => Err(ReactiveError::invalid_key(key, Shape::List)),
        }
    }
}

impl fmt::Debug for ReactiveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveList")
            .field("target", self.target())
            .field("flags", &self.facade.flags())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, EngineConfig};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn list(engine: &Engine, items: &[i32]) -> ReactiveList {
        engine
            .reactive(&Target::list_from(items.iter().copied()))
            .into_list()
            .unwrap()
    }

    fn counting_effect<F>(engine: &Engine, body: F) -> Arc<AtomicI32>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        engine.effect(move || {
            body();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        runs
    }

    #[test]
    fn push_triggers_length_readers() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2]);

        let view = items.clone();
        let runs = counting_effect(&engine, move || {
            view.len();
        });

        assert_eq!(items.push(3), Ok(3));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn overwriting_an_index_skips_length_readers() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2]);

        let view = items.clone();
        let runs = counting_effect(&engine, move || {
            view.len();
        });

        items.set(0, 10).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        items.set(5, 10).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(items.target().len_raw(), 6);
    }

    #[test]
    fn pushing_inside_effects_does_not_loop() {
        let engine = Engine::new();
        let items = list(&engine, &[]);

        let first = items.clone();
        let a = engine.effect(move || {
            first.push(1).unwrap();
        });
        let second = items.clone();
        let b = engine.effect(move || {
            second.push(2).unwrap();
        });

        assert_eq!(a.run_count(), 1);
        assert_eq!(b.run_count(), 1);
        assert_eq!(a.dependency_count(), 0);
        assert_eq!(items.target().len_raw(), 2);
    }

    #[test]
    fn shift_invalidates_moved_indices() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2, 3]);

        let view = items.clone();
        let runs = counting_effect(&engine, move || {
            view.get(1);
        });

        assert_eq!(items.shift(), Ok(Some(Value::from(1))));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(items.get(1), Value::from(3));
    }

    #[test]
    fn pop_on_empty_list_changes_nothing() {
        let engine = Engine::new();
        let items = list(&engine, &[]);

        let view = items.clone();
        let runs = counting_effect(&engine, move || {
            view.len();
        });

        assert_eq!(items.pop(), Ok(None));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn truncation_invalidates_dropped_indices() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2, 3, 4]);

        let low_view = items.clone();
        let low = counting_effect(&engine, move || {
            low_view.get(0);
        });
        let high_view = items.clone();
        let high = counting_effect(&engine, move || {
            high_view.get(3);
        });

        items.set_len(2).unwrap();
        assert_eq!(low.load(Ordering::SeqCst), 1);
        assert_eq!(high.load(Ordering::SeqCst), 2);
        assert!(items.get(3).is_null());
    }

    #[test]
    fn splice_returns_removed_and_inserts() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2, 3, 4]);

        let removed = items
            .splice(1, 2, vec![Value::from(9)])
            .unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(items.to_vec(), vec![Value::from(1), Value::from(9), Value::from(4)]);

        // Out-of-range bounds clamp.
        assert!(items.splice(10, 5, Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn delete_leaves_a_hole() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2]);

        assert_eq!(items.delete(0), Ok(true));
        assert_eq!(items.delete(5), Ok(false));
        assert!(items.get(0).is_null());
        assert_eq!(items.target().len_raw(), 2);
    }

    #[test]
    fn search_finds_raw_elements_behind_facades() {
        let engine = Engine::new();
        let element = Target::record();
        let items = engine
            .reactive(&Target::list_from([Value::Object(element.clone())]))
            .into_list()
            .unwrap();

        // Reads hand back the façade, yet the raw handle is still found.
        assert!(items.get(0).as_reactive().is_some());
        assert!(items.includes(&Value::Object(element.clone())));
        assert_eq!(items.index_of(&Value::Object(element)), Some(0));

        let wrapped = items.get(0);
        assert_eq!(items.index_of(&wrapped), Some(0));
    }

    #[test]
    fn nan_matches_only_in_includes() {
        let engine = Engine::new();
        let items = engine
            .reactive(&Target::list_from([1.0, f64::NAN, 1.0]))
            .into_list()
            .unwrap();

        assert!(items.includes(&Value::from(f64::NAN)));
        assert_eq!(items.index_of(&Value::from(f64::NAN)), None);
        assert_eq!(items.last_index_of(&Value::from(1.0)), Some(2));
    }

    #[test]
    fn readonly_list_rejects_bulk_methods() {
        let engine = Engine::new();
        let target = Target::list_from([1]);
        let items = engine.readonly(&target).into_list().unwrap();

        assert!(items.push(2).is_err());
        assert!(items.pop().is_err());
        assert!(items.set_len(0).is_err());
        assert_eq!(target.len_raw(), 1);
    }

    #[test]
    fn growth_past_the_limit_is_rejected() {
        let engine = Engine::with_config(EngineConfig {
            max_list_len: 8,
            ..EngineConfig::default()
        });
        let items = list(&engine, &[1, 2]);

        assert_eq!(
            items.set_len(usize::MAX),
            Err(ReactiveError::ListTooLong { len: usize::MAX, max: 8 })
        );
        assert!(matches!(items.set(8, 1), Err(ReactiveError::ListTooLong { len: 9, .. })));
        assert!(items
            .write(Value::from("length"), Value::from(9e15))
            .is_err());
        assert_eq!(items.target().len_raw(), 2);

        // Shrinking and growing up to the limit still work.
        items.set_len(8).unwrap();
        items.set(7, 1).unwrap();
        items.set_len(1).unwrap();
        assert_eq!(items.target().len_raw(), 1);
    }

    #[test]
    fn push_and_pop_only_touch_the_tail() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2, 3]);

        let head = items.clone();
        let head_runs = counting_effect(&engine, move || {
            head.get(0);
        });
        let tail = items.clone();
        let tail_runs = counting_effect(&engine, move || {
            tail.get(3);
        });

        items.push(4).unwrap();
        assert_eq!(head_runs.load(Ordering::SeqCst), 1);
        assert_eq!(tail_runs.load(Ordering::SeqCst), 2);

        assert_eq!(items.pop(), Ok(Some(Value::from(4))));
        assert_eq!(head_runs.load(Ordering::SeqCst), 1);
        assert_eq!(tail_runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn splice_diffs_from_its_start() {
        let engine = Engine::new();
        let items = list(&engine, &[1, 2, 3, 4]);

        let kept = items.clone();
        let kept_runs = counting_effect(&engine, move || {
            kept.get(0);
        });
        let moved = items.clone();
        let moved_runs = counting_effect(&engine, move || {
            moved.get(2);
        });

        items.splice(1, 1, Vec::new()).unwrap();
        assert_eq!(kept_runs.load(Ordering::SeqCst), 1);
        assert_eq!(moved_runs.load(Ordering::SeqCst), 2);
        assert_eq!(items.get(2), Value::from(4));
    }
}
