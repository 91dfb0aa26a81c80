//! Watchers
//!
//! A watcher turns a tracked source into callbacks with the new and the
//! previous value. The source is either a getter, or a reactive container
//! that is traversed deeply so that every reachable field becomes a
//! dependency.
//!
//! The getter runs as a lazy effect whose scheduler is the watch job: run
//! the effect to get the new value, call the callback, and keep the new
//! value as the next old value. With [`Flush::Post`] the job goes through the
//! engine's job queue instead of running synchronously, so several writes in
//! one turn produce one callback.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::{Effect, Runner, Scheduler};
use super::runtime::{Engine, WeakEngine};
use super::subscriber::ComputationId;
use crate::graph::Job;
use crate::value::{TargetId, Value};
use crate::wrap::{Observable, Reactive};

/// When a watch callback runs after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flush {
    /// During the write that caused the change.
    #[default]
    Sync,
    /// In the engine's next job flush.
    Post,
}

/// Options for [`Engine::watch`](crate::Engine::watch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchOptions {
    /// Call the callback once at registration, with no old value.
    pub immediate: bool,
    pub flush: Flush,
}

impl WatchOptions {
    /// Lazy, synchronous watch options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call the callback once at registration.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Choose when the callback runs after a change.
    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }
}

/// Handle to a registered watch.
///
/// Dropping the handle does not stop the watch; call [`stop`](Self::stop).
pub struct Watcher {
    effect: Effect<()>,
}

impl Watcher {
    /// Stop watching. The callback will not be called again.
    pub fn stop(&self) {
        self.effect.dispose();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.effect.is_disposed()
    }

    pub fn id(&self) -> ComputationId {
        self.effect.id()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

pub(crate) fn register<T, G, C>(engine: &Engine, getter: G, callback: C, options: WatchOptions) -> Watcher
where
    T: Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
    C: Fn(&T, Option<&T>) + Send + Sync + 'static,
{
    // The effect stores what it produced here; the job picks it up.
    let latest: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let previous: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

    let body_latest = Arc::clone(&latest);
    let body = move || {
        let value = getter();
        *body_latest.lock() = Some(value);
    };

    let job = {
        let latest = Arc::clone(&latest);
        let previous = Arc::clone(&previous);
        move |runner: &Runner| {
            if runner.is_disposed() {
                return;
            }
            runner.run();
            let Some(new) = latest.lock().take() else {
                return;
            };
            let old = previous.lock().take();
            callback(&new, old.as_ref());
            *previous.lock() = Some(new);
        }
    };
    let job: Arc<dyn Fn(&Runner) + Send + Sync> = Arc::new(job);

    let scheduler: Scheduler = match options.flush {
        Flush::Sync => Arc::clone(&job),
        Flush::Post => {
            let engine = engine.downgrade();
            let job = Arc::clone(&job);
            Arc::new(move |runner: &Runner| queue_post(&engine, &job, runner))
        }
    };

    let effect = Effect::new(engine.downgrade(), body, Some(scheduler));

    if options.immediate {
        job(&effect.runner());
    } else {
        // Seed the old value without calling back.
        effect.run();
        let initial = latest.lock().take();
        *previous.lock() = initial;
    }

    Watcher { effect }
}

fn queue_post(engine: &WeakEngine, job: &Arc<dyn Fn(&Runner) + Send + Sync>, runner: &Runner) {
    let Some(engine) = engine.upgrade() else {
        return;
    };
    let job = Arc::clone(job);
    let runner = runner.clone();
    engine.queue_job(Job::new(runner.id(), move || job(&runner)));
}

pub(crate) fn register_deep<C>(
    engine: &Engine,
    source: Reactive,
    callback: C,
    options: WatchOptions,
) -> Watcher
where
    C: Fn(&Reactive, Option<&Reactive>) + Send + Sync + 'static,
{
    let weak = engine.downgrade();
    let getter = move || {
        traverse(&weak, &Value::Reactive(source.clone()), &mut HashSet::new());
        source.clone()
    };
    register(engine, getter, callback, options)
}

/// Read every field reachable from `value`, visiting each target once.
fn traverse(engine: &WeakEngine, value: &Value, seen: &mut HashSet<TargetId>) {
    let reactive = match value {
        Value::Reactive(reactive) => reactive.clone(),
        Value::Object(target) => match engine.upgrade() {
            Some(engine) => engine.reactive(target),
            None => return,
        },
        _ => return,
    };

    if !seen.insert(reactive.target().id()) {
        return;
    }

    for key in reactive.keys() {
        let child = reactive.read(&key);
        traverse(engine, &child, seen);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReactiveRecord, Target};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn record(engine: &Engine, fields: &[(&str, i32)]) -> ReactiveRecord {
        engine
            .reactive(&Target::record_from(fields.iter().copied()))
            .into_record()
            .unwrap()
    }

    #[test]
    fn watch_reports_new_and_old() {
        let engine = Engine::new();
        let state = record(&engine, &[("val", 1)]);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let view = state.clone();
        let calls_clone = calls.clone();
        let _watcher = engine.watch(
            move || view.get("val").as_i64().unwrap_or(0),
            move |new, old| calls_clone.lock().push((*new, old.copied())),
            WatchOptions::new(),
        );
        assert!(calls.lock().is_empty());

        state.update("val", |v| Value::from(v.as_i64().unwrap_or(0) + 1)).unwrap();
        assert_eq!(*calls.lock(), vec![(2, Some(1))]);

        state.set("val", 5).unwrap();
        assert_eq!(*calls.lock(), vec![(2, Some(1)), (5, Some(2))]);
    }

    #[test]
    fn immediate_fires_without_old_value() {
        let engine = Engine::new();
        let state = record(&engine, &[("val", 1)]);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let view = state.clone();
        let calls_clone = calls.clone();
        let _watcher = engine.watch(
            move || view.get("val").as_i64().unwrap_or(0),
            move |new, old| calls_clone.lock().push((*new, old.copied())),
            WatchOptions::new().immediate(),
        );
        assert_eq!(*calls.lock(), vec![(1, None)]);

        state.set("val", 2).unwrap();
        assert_eq!(*calls.lock(), vec![(1, None), (2, Some(1))]);
    }

    #[test]
    fn post_flush_batches_writes() {
        let engine = Engine::new();
        let state = record(&engine, &[("a", 1), ("b", 1)]);
        let calls = Arc::new(AtomicI32::new(0));

        let view = state.clone();
        let calls_clone = calls.clone();
        let _watcher = engine.watch(
            move || view.get("a").as_i64().unwrap_or(0) + view.get("b").as_i64().unwrap_or(0),
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new().flush(Flush::Post),
        );

        state.set("a", 2).unwrap();
        state.set("b", 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.pending_jobs(), 1);

        engine.run_microtasks();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_silences_the_callback() {
        let engine = Engine::new();
        let state = record(&engine, &[("val", 1)]);
        let calls = Arc::new(AtomicI32::new(0));

        let view = state.clone();
        let calls_clone = calls.clone();
        let watcher = engine.watch(
            move || view.get("val"),
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new(),
        );

        watcher.stop();
        assert!(watcher.is_stopped());

        state.set("val", 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deep_watch_sees_nested_writes_and_survives_cycles() {
        let engine = Engine::new();
        let inner = Target::record_from([("x", 1)]);
        let outer = Target::record_from([("inner", Value::Object(inner.clone()))]);
        // outer.inner.back -> outer
        engine
            .reactive(&inner)
            .into_record()
            .unwrap()
            .set("back", Value::Object(outer.clone()))
            .unwrap();

        let source = engine.reactive(&outer);
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let _watcher = engine.watch_reactive(
            &source,
            move |new, old| {
                assert!(old.is_some_and(|old| old.ptr_eq(new)));
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new(),
        );

        let nested = engine.reactive(&inner).into_record().unwrap();
        nested.set("x", 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
