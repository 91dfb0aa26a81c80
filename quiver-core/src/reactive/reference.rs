//! Refs: reactive single-value cells.
//!
//! A [`Ref`] is a view of one field of a reactive record. [`Engine::ref_value`]
//! creates a fresh `{ value }` record for it; [`Ref::to_ref`] points at a field
//! of an existing record, so reads and writes through the ref and through the
//! record are the same slot.

use std::fmt;
use std::sync::Arc;

use super::runtime::Engine;
use crate::error::ReactiveError;
use crate::value::{Target, Value};
use crate::wrap::{Reactive, ReactiveRecord};

#[derive(Clone)]
pub struct Ref {
    record: ReactiveRecord,
    key: Arc<str>,
}

impl Ref {
    pub(crate) fn new(engine: &Engine, value: impl Into<Value>) -> Self {
        let target = Target::record_from([("value", value)]);
        let record = match engine.reactive(&target) {
            Reactive::Record(record) => record,
            other => unreachable!("record target wrapped as {}", other.shape()),
        };
        Self {
            record,
            key: Arc::from("value"),
        }
    }

    /// A ref aliasing `key` of `record`.
    pub fn to_ref(record: &ReactiveRecord, key: &str) -> Self {
        Self {
            record: record.clone(),
            key: Arc::from(key),
        }
    }

    /// Tracked read.
    pub fn get(&self) -> Value {
        self.record.get(&self.key)
    }

    /// Read without subscribing the running computation.
    pub fn get_untracked(&self) -> Value {
        self.record.target().get_raw(&*self.key).unwrap_or_default()
    }

    /// Write the value, invalidating readers if it changed.
    pub fn set(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        self.record.set(&self.key, value)
    }

    /// Read, transform and write back the value.
    pub fn update<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(Value) -> Value,
    {
        self.record.update(&self.key, f)
    }

    /// The record this ref reads from.
    pub fn record(&self) -> &ReactiveRecord {
        &self.record
    }

    /// The record key this ref reads and writes.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("target", self.record.target())
            .field("key", &self.key)
            .finish()
    }
}
