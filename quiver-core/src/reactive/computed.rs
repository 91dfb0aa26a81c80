//! Computed Values
//!
//! A computed value is a derived value that caches its result and
//! recomputes only when one of its dependencies has changed *and* someone
//! reads it again.
//!
//! # How It Works
//!
//! A computed value plays two roles at once:
//!
//! 1. It is a subscriber. Its getter runs as a lazy effect, so the getter's
//!    reads are tracked like any other computation's. The effect's scheduler
//!    does not recompute; it only marks the cache dirty.
//!
//! 2. It is a target. It owns a synthetic `(id, "value")` slot. Reading the
//!    computed records a read of that slot, and marking it dirty invalidates
//!    that slot, so whoever read the computed is re-run and pulls the new
//!    value.
//!
//! Marking dirty when already dirty does nothing, so a burst of writes to the
//! inputs notifies downstream readers once.
//!
//! # States
//!
//! ```text
//!     +-------+   input written   +-------+
//!     | Clean | ----------------> | Dirty |
//!     +-------+                   +-------+
//!         ^                           |
//!         |          get()            |
//!         +---------------------------+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::{Effect, Runner, Scheduler};
use super::runtime::{Engine, WeakEngine};
use super::subscriber::ComputationId;
use crate::graph::{FieldKey, MutationKind};
use crate::value::{Shape, TargetId};

/// The target side of a computed value.
struct ComputedCell<T> {
    id: TargetId,
    dirty: AtomicBool,
    cache: Mutex<Option<T>>,
    engine: WeakEngine,
}

impl<T> ComputedCell<T> {
    fn mark_dirty(&self) {
        if self.dirty.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.invalidate(self.id, Shape::Record, value_key(), MutationKind::Set);
        }
    }

    fn track(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.record_read(self.id, value_key());
        }
    }
}

fn value_key() -> FieldKey {
    FieldKey::prop("value")
}

struct ComputedInner<T> {
    effect: Effect<T>,
    cell: Arc<ComputedCell<T>>,
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.effect.dispose();
        if let Some(engine) = self.cell.engine.upgrade() {
            engine.release(self.cell.id);
        }
    }
}

/// A memoized value derived from reactive state.
///
/// # Example
///
/// ```rust
/// use quiver_core::{Engine, Target};
///
/// let engine = Engine::new();
/// let counter = engine.reactive(&Target::record_from([("count", 2)])).into_record().unwrap();
///
/// let view = counter.clone();
/// let doubled = engine.computed(move || view.get("count").as_i64().unwrap_or(0) * 2);
///
/// assert_eq!(doubled.get(), 4);
/// counter.set("count", 5).unwrap();
/// assert!(doubled.is_dirty());
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F>(engine: &Engine, getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let cell = Arc::new(ComputedCell {
            id: TargetId::new(),
            dirty: AtomicBool::new(true),
            cache: Mutex::new(None),
            engine: engine.downgrade(),
        });

        let scheduler_cell = Arc::clone(&cell);
        let scheduler: Scheduler = Arc::new(move |_: &Runner| scheduler_cell.mark_dirty());
        let effect = Effect::new(engine.downgrade(), getter, Some(scheduler));

        Self {
            inner: Arc::new(ComputedInner { effect, cell }),
        }
    }

    /// The current value, recomputed first if an input changed since the
    /// last read.
    pub fn get(&self) -> T {
        let cell = &self.inner.cell;
        let cached = if cell.dirty.load(Ordering::Acquire) {
            None
        } else {
            cell.cache.lock().clone()
        };

        let value = match cached {
            Some(value) => value,
            None => {
                let value = self.inner.effect.run();
                *cell.cache.lock() = Some(value.clone());
                cell.dirty.store(false, Ordering::Release);
                value
            }
        };

        cell.track();
        value
    }

    /// Whether the next [`get`](Self::get) will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.cell.dirty.load(Ordering::Acquire)
    }

    /// The synthetic target readers subscribe to.
    pub fn id(&self) -> TargetId {
        self.inner.cell.id
    }

    /// The ID of the underlying computation.
    pub fn computation_id(&self) -> ComputationId {
        self.inner.effect.id()
    }

    /// Number of times the getter has run.
    pub fn compute_count(&self) -> usize {
        self.inner.effect.run_count()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.cell.id)
            .field("dirty", &self.inner.cell.dirty.load(Ordering::Acquire))
            .field("compute_count", &self.inner.effect.run_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
