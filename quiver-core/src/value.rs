//! Values and Targets
//!
//! A [`Target`] is a raw mutable composite (record, list, or map) that can be
//! placed under reactive observation. Targets are shared by reference and are
//! identified by a generated [`TargetId`] rather than by their contents, so
//! two records with equal fields are still two distinct targets.
//!
//! [`Value`] is the dynamic data stored in targets. Scalars are stored
//! inline; composites are stored as raw `Object` targets. Reading through a
//! deep reactive façade hands nested composites back as `Reactive` values.
//!
//! # Equality
//!
//! Values compare with SameValueZero semantics: `NaN` equals `NaN`, `0.0`
//! equals `-0.0`, and composites compare by target identity. A façade and
//! its raw target are the same value. The engine uses this relation both to
//! decide whether a write changed anything and to key map containers.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};

use crate::wrap::Reactive;

/// Unique identifier for an observable target.
///
/// Raw composites get one on construction. Computed values allocate one for
/// their synthetic `value` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

/// The container shape of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Named fields in insertion order.
    Record,
    /// An ordered, index-addressed sequence.
    List,
    /// Arbitrary keys mapped to values.
    Map,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Record => "record",
            Shape::List => "list",
            Shape::Map => "map",
        };
        f.write_str(name)
    }
}

/// Backing storage of a target.
#[derive(Debug, Clone)]
pub enum TargetData {
    Record(IndexMap<Arc<str>, Value>),
    List(Vec<Value>),
    Map(IndexMap<Value, Value>),
}

impl TargetData {
    /// The shape of this storage.
    pub fn shape(&self) -> Shape {
        match self {
            TargetData::Record(_) => Shape::Record,
            TargetData::List(_) => Shape::List,
            TargetData::Map(_) => Shape::Map,
        }
    }

    /// Number of slots (fields, elements or entries).
    pub fn len(&self) -> usize {
        match self {
            TargetData::Record(fields) => fields.len(),
            TargetData::List(items) => items.len(),
            TargetData::Map(entries) => entries.len(),
        }
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TargetCell {
    id: TargetId,
    shape: Shape,
    data: Mutex<TargetData>,
}

/// A raw mutable composite, shared by reference.
///
/// Cloning a `Target` clones the handle, not the contents. Reads and writes
/// made directly on a `Target` are invisible to the engine; wrap it with
/// [`Engine::reactive`](crate::Engine::reactive) to observe it.
#[derive(Clone)]
pub struct Target(Arc<TargetCell>);

impl Target {
    /// Create a target around existing storage.
    pub fn new(data: TargetData) -> Self {
        Self(Arc::new(TargetCell {
            id: TargetId::new(),
            shape: data.shape(),
            data: Mutex::new(data),
        }))
    }

    /// Create an empty record.
    pub fn record() -> Self {
        Self::new(TargetData::Record(IndexMap::new()))
    }

    /// Create an empty list.
    pub fn list() -> Self {
        Self::new(TargetData::List(Vec::new()))
    }

    /// Create an empty map.
    pub fn map() -> Self {
        Self::new(TargetData::Map(IndexMap::new()))
    }

    /// Create a record from `(field, value)` pairs.
    pub fn record_from<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into().to_raw()))
            .collect();
        Self::new(TargetData::Record(fields))
    }

    /// Create a list from items.
    pub fn list_from<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = items.into_iter().map(|v| v.into().to_raw()).collect();
        Self::new(TargetData::List(items))
    }

    /// Create a map from `(key, value)` pairs.
    pub fn map_from<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into().to_raw(), v.into().to_raw()))
            .collect();
        Self::new(TargetData::Map(entries))
    }

    /// Build a target from a JSON object or array.
    ///
    /// Returns `None` for JSON scalars, which are not composites.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match Value::from(json) {
            Value::Object(target) => Some(target),
            _ => None,
        }
    }

    /// Get the target's unique ID.
    pub fn id(&self) -> TargetId {
        self.0.id
    }

    /// Get the target's container shape.
    pub fn shape(&self) -> Shape {
        self.0.shape
    }

    /// Whether two handles refer to the same target.
    pub fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TargetData> {
        self.0.data.lock()
    }

    /// Untracked read of one slot.
    ///
    /// Records take string keys, lists take indices (or `"length"`), maps
    /// take any key. Returns `None` for absent slots.
    pub fn get_raw(&self, key: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let data = self.lock();
        match &*data {
            TargetData::Record(fields) => key.as_str().and_then(|k| fields.get(k).cloned()),
            TargetData::List(items) => match key.as_index() {
                Some(index) => items.get(index).cloned(),
                None if key.as_str() == Some("length") => Some(Value::from(items.len())),
                None => None,
            },
            TargetData::Map(entries) => entries.get(&key.to_raw()).cloned(),
        }
    }

    /// Untracked slot count.
    pub fn len_raw(&self) -> usize {
        self.lock().len()
    }

    /// Untracked, cycle-safe JSON snapshot. Revisited composites become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.clone()).to_json()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.0.id)
            .field("shape", &self.0.shape)
            .finish()
    }
}

/// Dynamic data stored in targets.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or empty.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    /// A raw composite.
    Object(Target),
    /// A reactive façade over a composite.
    Reactive(Reactive),
}

/// Identity projection used by `PartialEq` and `Hash`.
#[derive(PartialEq, Eq, Hash)]
enum Identity<'a> {
    Null,
    Bool(bool),
    Number(u64),
    Str(&'a str),
    Target(TargetId),
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn number_bits(n: f64) -> u64 {
    if n == 0.0 {
        0.0f64.to_bits()
    } else if n.is_nan() {
        f64::NAN.to_bits()
    } else {
        n.to_bits()
    }
}

impl Value {
    fn identity(&self) -> Identity<'_> {
        match self {
            Value::Null => Identity::Null,
            Value::Bool(b) => Identity::Bool(*b),
            Value::Number(n) => Identity::Number(number_bits(*n)),
            Value::Str(s) => Identity::Str(s),
            Value::Object(target) => Identity::Target(target.id()),
            Value::Reactive(reactive) => Identity::Target(reactive.target().id()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as an integer, if it is finite and has no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Some(*n as i64),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a list index.
    pub fn as_index(&self) -> Option<usize> {
        match self.as_i64() {
            Some(n) if n >= 0 => Some(n as usize),
            _ => None,
        }
    }

    /// The raw target behind an `Object` or `Reactive` value.
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Value::Object(target) => Some(target),
            Value::Reactive(reactive) => Some(reactive.target()),
            _ => None,
        }
    }

    /// The façade, if this is one.
    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(reactive) => Some(reactive),
            _ => None,
        }
    }

    /// Whether this is a record, list or map (raw or wrapped).
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Reactive(_))
    }

    /// Strip a reactive façade, leaving the raw target.
    pub fn to_raw(&self) -> Value {
        match self {
            Value::Reactive(reactive) => Value::Object(reactive.target().clone()),
            other => other.clone(),
        }
    }

    /// SameValueZero comparison, through façades.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        self.identity() == other.identity()
    }

    /// Handle-level identity: a façade is not identical to its raw target,
    /// and `NaN` matches `NaN` only when `nan_equal` is set.
    pub fn identical(&self, other: &Value, nan_equal: bool) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (nan_equal && a.is_nan() && b.is_nan()),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Reactive(a), Value::Reactive(b)) => a.ptr_eq(b),
            (Value::Object(_), Value::Reactive(_)) | (Value::Reactive(_), Value::Object(_)) => false,
            (a, b) => a.identity() == b.identity(),
        }
    }

    /// Untracked, cycle-safe JSON snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visited = HashSet::new();
        self.to_json_inner(&mut visited)
    }

    fn to_json_inner(&self, visited: &mut HashSet<TargetId>) -> serde_json::Value {
        use serde_json::Value as Json;

        let target = match self {
            Value::Null => return Json::Null,
            Value::Bool(b) => return Json::Bool(*b),
            Value::Number(_) => {
                return match self.as_i64() {
                    Some(i) => Json::from(i),
                    None => self
                        .as_f64()
                        .and_then(serde_json::Number::from_f64)
                        .map(Json::Number)
                        .unwrap_or(Json::Null),
                };
            }
            Value::Str(s) => return Json::String(s.to_string()),
            Value::Object(target) => target,
            Value::Reactive(reactive) => reactive.target(),
        };

        if !visited.insert(target.id()) {
            return Json::Null;
        }

        // Snapshot before recursing so no target lock is held across children.
        let snapshot = target.lock().clone();
        let json = match snapshot {
            TargetData::Record(fields) => Json::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_json_inner(visited)))
                    .collect(),
            ),
            TargetData::List(items) => {
                Json::Array(items.iter().map(|v| v.to_json_inner(visited)).collect())
            }
            TargetData::Map(entries) => Json::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_json_inner(visited)))
                    .collect(),
            ),
        };

        visited.remove(&target.id());
        json
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value_zero(other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(_) => match self.as_i64() {
                Some(i) => write!(f, "{i}"),
                None => write!(f, "{}", self.as_f64().unwrap_or(f64::NAN)),
            },
            Value::Str(s) => f.write_str(s),
            Value::Object(target) => write!(f, "[{} #{}]", target.shape(), target.id().raw()),
            Value::Reactive(reactive) => {
                let target = reactive.target();
                write!(f, "[reactive {} #{}]", target.shape(), target.id().raw())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Value::Object(target)
    }
}

impl From<Reactive> for Value {
    fn from(reactive: Reactive) -> Self {
        Value::Reactive(reactive)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::Object(Target::list_from(items.into_iter().map(Value::from))),
            Json::Object(fields) => Value::Object(Target::record_from(
                fields.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}
