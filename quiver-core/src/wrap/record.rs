//! Record façade: named fields.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Facade, Observable};
use crate::error::ReactiveError;
use crate::graph::{FieldKey, MutationKind};
use crate::value::{Shape, Target, TargetData, Value};

fn fields(data: &mut TargetData) -> &mut IndexMap<Arc<str>, Value> {
    match data {
        TargetData::Record(fields) => fields,
        other => unreachable!("record façade over a {} target", other.shape()),
    }
}

/// Reactive view of a record target.
#[derive(Clone)]
pub struct ReactiveRecord {
    facade: Arc<Facade>,
}

impl ReactiveRecord {
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

    /// Tracked read of one field. Missing fields read as `Null`.
    pub fn get(&self, key: &str) -> Value {
        self.facade.track(FieldKey::prop(key));
        let raw = fields(&mut self.target().lock()).get(key).cloned();
        self.facade.wrap_out(raw.unwrap_or_default())
    }

    /// Write one field.
    ///
    /// Creating a field invalidates enumeration; overwriting one invalidates
    /// only its readers, and only when the value actually changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ReactiveError> {
        self.facade.check_writable(key)?;

        let value = value.into().to_raw();
        let kind = {
            let mut data = self.target().lock();
            match fields(&mut data).insert(Arc::from(key), value.clone()) {
                None => Some(MutationKind::Add),
                Some(old) if !old.same_value_zero(&value) => Some(MutationKind::Set),
                Some(_) => None,
            }
        };

        if let Some(kind) = kind {
            self.facade.trigger(FieldKey::prop(key), kind);
        }
        Ok(())
    }

    /// Read, transform and write back one field.
    pub fn update<F>(&self, key: &str, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(Value) -> Value,
    {
        let next = f(self.get(key));
        self.set(key, next)
    }

    /// Tracked check for a field.
    pub fn has(&self, key: &str) -> bool {
        self.facade.track(FieldKey::prop(key));
        fields(&mut self.target().lock()).contains_key(key)
    }

    /// Field names in insertion order. Subscribes to enumeration.
    pub fn keys(&self) -> Vec<Arc<str>> {
        self.facade.track(FieldKey::Iterate);
        fields(&mut self.target().lock()).keys().cloned().collect()
    }

    /// Number of fields. Tracks enumeration.
    pub fn len(&self) -> usize {
        self.facade.track(FieldKey::Iterate);
        self.target().len_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every field with its value, each read tracked.
    pub fn entries(&self) -> Vec<(Arc<str>, Value)> {
        self.facade.track(FieldKey::Iterate);
        let snapshot: Vec<(Arc<str>, Value)> = fields(&mut self.target().lock())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(key, value)| {
                self.facade.track(FieldKey::Prop(key.clone()));
                (key, self.facade.wrap_out(value))
            })
            .collect()
    }

    /// Remove a field. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, ReactiveError> {
        self.facade.check_writable(key)?;

        let existed = fields(&mut self.target().lock()).shift_remove(key).is_some();
        if existed {
            self.facade.trigger(FieldKey::prop(key), MutationKind::Delete);
        }
        Ok(existed)
    }

    /// Remove every field.
    pub fn clear(&self) -> Result<(), ReactiveError> {
        self.facade.check_writable("*")?;

        let had_fields = {
            let mut data = self.target().lock();
            let fields = fields(&mut data);
            let had_fields = !fields.is_empty();
            fields.clear();
            had_fields
        };
        if had_fields {
            self.facade.trigger(FieldKey::Iterate, MutationKind::Clear);
        }
        Ok(())
    }

    /// Untracked, cycle-safe JSON snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        self.target().to_json()
    }
}

impl Observable for ReactiveRecord {
    fn read(&self, key: &Value) -> Value {
        key.as_str().map(|key| self.get(key)).unwrap_or_default()
    }

    fn write(&self, key: Value, value: Value) -> Result<(), ReactiveError> {
        match key.as_str() {
            Some(name) => self.set(name, value),
            None => Err(ReactiveError::invalid_key(key, Shape::Record)),
        }
    }

    fn has(&self, key: &Value) -> bool {
        key.as_str().is_some_and(|key| ReactiveRecord::has(self, key))
    }

    fn keys(&self) -> Vec<Value> {
        ReactiveRecord::keys(self).into_iter().map(Value::Str).collect()
    }

    fn delete(&self, key: &Value) -> Result<bool, ReactiveError> {
        match key.as_str() {
            Some(name) => ReactiveRecord::delete(self, name),
            None => Err(ReactiveError::invalid_key(key, Shape::Record)),
        }
    }
}

impl fmt::Debug for ReactiveRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveRecord")
            .field("target", self.target())
            .field("flags", &self.facade.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn record(engine: &Engine, fields: &[(&str, i32)]) -> ReactiveRecord {
        engine
            .reactive(&Target::record_from(fields.iter().copied()))
            .into_record()
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
    fn set_triggers_readers_of_that_field_only() {
        let engine = Engine::new();
        let state = record(&engine, &[("a", 1), ("b", 2)]);

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.get("a");
        });

        state.set("b", 3).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("a", 5).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nan_write_over_nan_is_not_a_change() {
        let engine = Engine::new();
        let state = engine
            .reactive(&Target::record_from([("x", f64::NAN)]))
            .into_record()
            .unwrap();

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.get("x");
        });

        state.set("x", f64::NAN).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn adding_a_field_triggers_enumeration() {
        let engine = Engine::new();
        let state = record(&engine, &[("a", 1)]);

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.keys();
        });

        state.set("a", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("b", 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        state.delete("b").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn has_subscribes_to_the_key() {
        let engine = Engine::new();
        let state = record(&engine, &[]);

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.has("flag");
        });

        state.set("flag", true).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delete_of_missing_field_is_silent() {
        let engine = Engine::new();
        let state = record(&engine, &[("a", 1)]);

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.len();
        });

        assert_eq!(state.delete("missing"), Ok(false));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(state.delete("a"), Ok(true));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_triggers_every_reader() {
        let engine = Engine::new();
        let state = record(&engine, &[("a", 1), ("b", 2)]);

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.get("b");
        });

        state.clear().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(state.is_empty());
    }

    #[test]
    fn entries_track_each_field() {
        let engine = Engine::new();
        let state = record(&engine, &[("a", 1), ("b", 2)]);

        let view = state.clone();
        let runs = counting_effect(&engine, move || {
            view.entries();
        });

        state.set("b", 9).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn update_applies_function() {
        let engine = Engine::new();
        let state = record(&engine, &[("n", 2)]);

        state
            .update("n", |n| Value::from(n.as_i64().unwrap_or(0) * 10))
            .unwrap();
        assert_eq!(state.get("n"), Value::from(20));
    }

    #[test]
    fn non_string_keys_are_rejected() {
        let engine = Engine::new();
        let state = record(&engine, &[]);

        let err = state.write(Value::from(3), Value::from(1)).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidKey { shape: Shape::Record, .. }));
        assert!(state.read(&Value::from(3)).is_null());
    }

    #[test]
    fn readonly_record_rejects_every_write() {
        let engine = Engine::new();
        let target = Target::record_from([("a", 1)]);
        let state = engine.readonly(&target).into_record().unwrap();

        assert!(state.set("a", 2).is_err());
        assert!(state.delete("a").is_err());
        assert!(state.clear().is_err());
        assert_eq!(target.get_raw("a"), Some(Value::from(1)));
    }
}
