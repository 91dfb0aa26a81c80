//! Reactive Façades
//!
//! A façade stands between application code and a raw [`Target`]. Every
//! read through it records a dependency and every write through it
//! invalidates the slots that changed. Once a target is wrapped, code is
//! expected to go through the façade; direct writes to the raw target are
//! invisible to the engine.
//!
//! # Modes
//!
//! [`WrapFlags`] selects one of four modes:
//!
//! | mode | nested composites | writes | reads tracked |
//! |---|---|---|---|
//! | deep (default) | wrapped deep | allowed | yes |
//! | shallow | returned raw | allowed | yes |
//! | readonly | wrapped readonly | rejected | no |
//! | shallow readonly | returned raw | rejected | no |
//!
//! Each `(target, mode)` pair maps to one façade while that façade is alive,
//! so wrapping twice yields the same handle.
//!
//! # Shapes
//!
//! Concrete façades exist per container shape: [`ReactiveRecord`],
//! [`ReactiveList`] and [`ReactiveMap`]. They all implement the
//! [`Observable`] capability set, and [`Reactive`] is the enum over them
//! that nested reads hand back.

mod list;
mod map;
mod record;

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::config::EngineConfig;
use crate::error::ReactiveError;
use crate::graph::{Change, FieldKey, MutationKind};
use crate::reactive::{ContextGuard, WeakEngine};
use crate::value::{Shape, Target, Value};

pub use list::ReactiveList;
pub use map::ReactiveMap;
pub use record::ReactiveRecord;

/// Wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WrapFlags {
    /// Return nested composites raw instead of wrapping them.
    pub shallow: bool,
    /// Reject writes and skip dependency tracking.
    pub readonly: bool,
}

impl WrapFlags {
    pub const DEEP: Self = Self {
        shallow: false,
        readonly: false,
    };
    pub const SHALLOW: Self = Self {
        shallow: true,
        readonly: false,
    };
    pub const READONLY: Self = Self {
        shallow: false,
        readonly: true,
    };
    pub const SHALLOW_READONLY: Self = Self {
        shallow: true,
        readonly: true,
    };
}

/// The capability set every façade offers, independent of shape.
///
/// Keys are dynamic: records take strings, lists take indices, maps take any
/// value. A key of the wrong kind yields [`ReactiveError::InvalidKey`] on
/// writes and reads as absent.
pub trait Observable {
    /// Tracked read. Absent slots read as `Null`.
    fn read(&self, key: &Value) -> Value;

    /// Write a slot, invalidating its subscribers if the value changed.
    fn write(&self, key: Value, value: Value) -> Result<(), ReactiveError>;

    /// Tracked existence check.
    fn has(&self, key: &Value) -> bool;

    /// Tracked enumeration of keys.
    fn keys(&self) -> Vec<Value>;

    /// Remove a slot. Returns whether it existed.
    fn delete(&self, key: &Value) -> Result<bool, ReactiveError>;
}

/// Shared state behind every façade handle.
pub(crate) struct Facade {
    engine: WeakEngine,
    target: Target,
    flags: WrapFlags,
}

impl Facade {
    pub(crate) fn new(engine: WeakEngine, target: Target, flags: WrapFlags) -> Self {
        Self {
            engine,
            target,
            flags,
        }
    }

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn flags(&self) -> WrapFlags {
        self.flags
    }

    fn track(&self, key: FieldKey) {
        if self.flags.readonly {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.record_read(self.target.id(), key);
        }
    }

    fn trigger(&self, key: FieldKey, kind: MutationKind) {
        if let Some(engine) = self.engine.upgrade() {
            engine.invalidate(self.target.id(), self.target.shape(), key, kind);
        }
    }

    fn trigger_batch(&self, changes: &[Change], truncate_from: Option<usize>) {
        if changes.is_empty() && truncate_from.is_none() {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.invalidate_batch(self.target.id(), self.target.shape(), changes, truncate_from);
        }
    }

    /// Prepare a value read from the target for the caller.
    fn wrap_out(&self, value: Value) -> Value {
        if self.flags.shallow {
            return value;
        }
        match value {
            Value::Object(target) => match self.engine.upgrade() {
                Some(engine) => {
                    let flags = WrapFlags {
                        shallow: false,
                        readonly: self.flags.readonly,
                    };
                    Value::Reactive(engine.wrap(&target, flags))
                }
                None => Value::Object(target),
            },
            other => other,
        }
    }

    /// `Err` when this façade is readonly.
    fn check_writable(&self, key: impl fmt::Display) -> Result<(), ReactiveError> {
        if !self.flags.readonly {
            return Ok(());
        }

        let warn_enabled = self
            .engine
            .upgrade()
            .map_or(true, |engine| engine.config().warn_on_readonly);
        if warn_enabled {
            warn!(
                target_id = self.target.id().raw(),
                %key,
                "write rejected: target is readonly"
            );
        }
        Err(ReactiveError::read_only(key))
    }

    /// `Err` when a write would grow the list to `len` past the limit.
    fn check_list_len(&self, len: usize) -> Result<(), ReactiveError> {
        let max = self.engine.upgrade().map_or_else(
            || EngineConfig::default().max_list_len,
            |engine| engine.config().max_list_len,
        );
        if len > max {
            warn!(target_id = self.target.id().raw(), len, max, "list growth rejected");
            return Err(ReactiveError::ListTooLong { len, max });
        }
        Ok(())
    }

    /// Suspend tracking until the guard drops.
    fn suspend_tracking(&self) -> Option<ContextGuard> {
        self.engine
            .upgrade()
            .map(|engine| ContextGuard::untracked(&engine))
    }
}

impl Drop for Facade {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.forget_facade(self.target.id(), self.flags);
        }
    }
}

/// A façade of any shape.
#[derive(Clone)]
pub enum Reactive {
    Record(ReactiveRecord),
    List(ReactiveList),
    Map(ReactiveMap),
}

impl Reactive {
    pub(crate) fn from_facade(facade: Arc<Facade>) -> Self {
        match facade.target().shape() {
            Shape::Record => Reactive::Record(ReactiveRecord::from_facade(facade)),
            Shape::List => Reactive::List(ReactiveList::from_facade(facade)),
            Shape::Map => Reactive::Map(ReactiveMap::from_facade(facade)),
        }
    }

    fn facade(&self) -> &Arc<Facade> {
        match self {
            Reactive::Record(record) => record.facade(),
            Reactive::List(list) => list.facade(),
            Reactive::Map(map) => map.facade(),
        }
    }

    /// The raw target behind this façade.
    pub fn target(&self) -> &Target {
        self.facade().target()
    }

    /// The mode this façade was created with.
    pub fn flags(&self) -> WrapFlags {
        self.facade().flags()
    }

    pub fn is_readonly(&self) -> bool {
        self.flags().readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.flags().shallow
    }

    /// Shape of the wrapped target.
    pub fn shape(&self) -> Shape {
        self.target().shape()
    }

    /// Whether two handles are the same façade.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Arc::ptr_eq(self.facade(), other.facade())
    }

    /// The record view, if the target is a record.
    pub fn as_record(&self) -> Option<&ReactiveRecord> {
        match self {
            Reactive::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ReactiveList> {
        match self {
            Reactive::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ReactiveMap> {
        match self {
            Reactive::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Consume into the record view, if the target is a record.
    pub fn into_record(self) -> Option<ReactiveRecord> {
        match self {
            Reactive::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<ReactiveList> {
        match self {
            Reactive::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<ReactiveMap> {
        match self {
            Reactive::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Untracked, cycle-safe JSON snapshot of the raw target.
    pub fn to_json(&self) -> serde_json::Value {
        self.target().to_json()
    }

    fn observable(&self) -> &dyn Observable {
        match self {
            Reactive::Record(record) => record,
            Reactive::List(list) => list,
            Reactive::Map(map) => map,
        }
    }
}

impl Observable for Reactive {
    fn read(&self, key: &Value) -> Value {
        self.observable().read(key)
    }

    fn write(&self, key: Value, value: Value) -> Result<(), ReactiveError> {
        self.observable().write(key, value)
    }

    fn has(&self, key: &Value) -> bool {
        self.observable().has(key)
    }

    fn keys(&self) -> Vec<Value> {
        self.observable().keys()
    }

    fn delete(&self, key: &Value) -> Result<bool, ReactiveError> {
        self.observable().delete(key)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", self.target())
            .field("flags", &self.flags())
            .finish()
    }
}

impl From<ReactiveRecord> for Reactive {
    fn from(record: ReactiveRecord) -> Self {
        Reactive::Record(record)
    }
}

impl From<ReactiveList> for Reactive {
    fn from(list: ReactiveList) -> Self {
        Reactive::List(list)
    }
}

impl From<ReactiveMap> for Reactive {
    fn from(map: ReactiveMap) -> Self {
        Reactive::Map(map)
    }
}
