//! Effect Implementation
//!
//! An Effect is a computation whose reads are tracked and which re-runs
//! whenever one of the slots it read is written.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish
//!    initial dependencies, unless it is lazy.
//!
//! 2. Every run first leaves all the subscriber sets it joined last time,
//!    then pushes itself on the engine's context stack and calls the body.
//!    Only the slots read during this run end up subscribed, so a branch
//!    that is no longer taken stops triggering the effect.
//!
//! 3. When a dependency changes, the effect either re-runs synchronously or,
//!    if it has a [`Scheduler`], is handed to the scheduler as a [`Runner`].
//!
//! # Differences from Computed
//!
//! - A [`Computed`](crate::Computed) is lazy and caches its result; an
//!   effect is eager and returns its body's value to whoever runs it.
//! - A computed value is itself a slot that other computations subscribe
//!   to; an effect is only ever a subscriber.
//!
//! # Lifetime
//!
//! Subscriber sets hold the computation, so dropping the [`Effect`] handle
//! does not stop it. [`Effect::dispose`] removes it from every set.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::ContextGuard;
use super::runtime::WeakEngine;
use super::subscriber::ComputationId;
use crate::graph::DepSet;

/// Hook that receives a computation instead of letting it re-run
/// synchronously.
///
/// Call [`Runner::run`] now, later, or never.
pub type Scheduler = Arc<dyn Fn(&Runner) + Send + Sync>;

/// Options for [`Engine::effect_with`](crate::Engine::effect_with).
#[derive(Clone, Default)]
pub struct EffectOptions {
    pub scheduler: Option<Scheduler>,
    /// Skip the initial run at registration.
    pub lazy: bool,
}

impl EffectOptions {
    /// Options for an eager effect without a scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not run the effect at registration.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Hand re-runs to `scheduler` instead of running them synchronously.
    pub fn scheduler<F>(self, scheduler: F) -> Self
    where
        F: Fn(&Runner) + Send + Sync + 'static,
    {
        self.with_scheduler(Arc::new(scheduler))
    }

    /// Like [`scheduler`](Self::scheduler), for an already shared scheduler.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("scheduler", &self.scheduler.is_some())
            .field("lazy", &self.lazy)
            .finish()
    }
}

/// Bookkeeping shared by every kind of computation.
pub(crate) struct ComputationState {
    id: ComputationId,
    engine: WeakEngine,
    scheduler: Option<Scheduler>,
    /// Reverse edges: the subscriber sets joined during the latest run.
    deps: Mutex<SmallVec<[Weak<DepSet>; 4]>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl ComputationState {
    pub(crate) fn new(engine: WeakEngine, scheduler: Option<Scheduler>) -> Self {
        Self {
            id: ComputationId::new(),
            engine,
            scheduler,
            deps: Mutex::new(SmallVec::new()),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn id(&self) -> ComputationId {
        self.id
    }

    pub(crate) fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn link(&self, dep: Weak<DepSet>) {
        self.deps.lock().push(dep);
    }

    /// Leave every subscriber set joined during the latest run.
    pub(crate) fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.deps.lock());
        for dep in deps {
            if let Some(dep) = dep.upgrade() {
                dep.unsubscribe(self.id);
            }
        }
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.deps.lock().len()
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.load(Ordering::Relaxed)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.cleanup();
            trace!(id = %self.id, "computation disposed");
        }
    }
}

/// Anything that can sit in a subscriber set.
pub(crate) trait Computation: Send + Sync {
    fn state(&self) -> &ComputationState;

    /// Run again, discarding the result.
    fn rerun(self: Arc<Self>);
}

pub(crate) type ComputationRef = Arc<dyn Computation>;

struct EffectInner<T> {
    state: ComputationState,
    body: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: 'static> Computation for EffectInner<T> {
    fn state(&self) -> &ComputationState {
        &self.state
    }

    fn rerun(self: Arc<Self>) {
        run_effect(&self);
    }
}

fn run_effect<T: 'static>(inner: &Arc<EffectInner<T>>) -> T {
    let Some(engine) = inner.state.engine.upgrade() else {
        return (inner.body)();
    };

    if inner.state.is_disposed() {
        let _frame = ContextGuard::untracked(&engine);
        return (inner.body)();
    }

    inner.state.cleanup();

    let computation: ComputationRef = inner.clone();
    let _frame = ContextGuard::enter(&engine, computation);
    inner.state.run_count.fetch_add(1, Ordering::Relaxed);
    trace!(id = %inner.state.id, depth = engine.depth(), "running computation");

    (inner.body)()
}

/// Type-erased handle that re-runs a computation.
///
/// This is what schedulers receive and what the job queue stores.
#[derive(Clone)]
pub struct Runner(ComputationRef);

impl Runner {
    pub(crate) fn new(computation: ComputationRef) -> Self {
        Self(computation)
    }

    /// Run the computation now, tracking its reads.
    pub fn run(&self) {
        self.0.clone().rerun();
    }

    pub fn id(&self) -> ComputationId {
        self.0.state().id()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.state().is_disposed()
    }

    /// Stop the computation. It leaves every subscriber set and queued
    /// re-runs of it are skipped.
    pub fn dispose(&self) {
        self.0.state().dispose();
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Runner").field(&self.id()).finish()
    }
}

/// A tracked computation that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust
/// use quiver_core::{Engine, Target};
///
/// let engine = Engine::new();
/// let state = engine.reactive(&Target::record_from([("count", 0)])).into_record().unwrap();
///
/// let view = state.clone();
/// let effect = engine.effect(move || {
///     println!("Count is: {}", view.get("count"));
/// });
///
/// state.set("count", 5).unwrap(); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect<T> {
    inner: Arc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    pub(crate) fn new<F>(engine: WeakEngine, body: F, scheduler: Option<Scheduler>) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(EffectInner {
                state: ComputationState::new(engine, scheduler),
                body: Box::new(body),
            }),
        }
    }

    /// Run the body now and return its value.
    ///
    /// Panics raised by the body propagate after the context frame has been
    /// popped. After [`dispose`](Self::dispose) the body still runs but its
    /// reads are no longer tracked.
    pub fn run(&self) -> T {
        run_effect(&self.inner)
    }

    /// A type-erased handle to this computation.
    pub fn runner(&self) -> Runner {
        Runner::new(self.inner.clone())
    }
}

impl<T> Effect<T> {
    /// Stable identity of this effect within its engine.
    pub fn id(&self) -> ComputationId {
        self.inner.state.id()
    }

    /// Stop reacting: leave every subscriber set and never re-run on writes.
    pub fn dispose(&self) {
        self.inner.state.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.is_disposed()
    }

    /// Number of tracked runs so far.
    pub fn run_count(&self) -> usize {
        self.inner.state.run_count()
    }

    /// Number of slots read during the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.state.dependency_count()
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = &self.inner.state;
        f.debug_struct("Effect")
            .field("id", &state.id())
            .field("run_count", &state.run_count())
            .field("dependency_count", &state.dependency_count())
            .field("disposed", &state.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, Target};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let engine = Engine::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = engine.effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let engine = Engine::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = engine.effect_with(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions::new().lazy(),
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        // Manually run
        effect.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_returns_body_value() {
        let engine = Engine::new();
        let state = engine.reactive(&Target::record_from([("n", 20)])).into_record().unwrap();

        let view = state.clone();
        let effect = engine.effect_with(
            move || view.get("n").as_i64().unwrap_or(0) + 1,
            EffectOptions::new().lazy(),
        );

        assert_eq!(effect.run(), 21);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let engine = Engine::new();
        let state = engine.reactive(&Target::record_from([("n", 1)])).into_record().unwrap();
        let seen = Arc::new(AtomicI32::new(0));

        let view = state.clone();
        let seen_clone = seen.clone();
        let effect = engine.effect(move || {
            let n = view.get("n").as_i64().unwrap_or(0) as i32;
            seen_clone.store(n, Ordering::SeqCst);
        });

        state.set("n", 7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(effect.run_count(), 2);

        // Same value, no re-run.
        state.set("n", 7).unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn scheduler_receives_runner_instead_of_rerun() {
        let engine = Engine::new();
        let state = engine.reactive(&Target::record_from([("n", 1)])).into_record().unwrap();
        let scheduled = Arc::new(AtomicI32::new(0));

        let view = state.clone();
        let scheduled_clone = scheduled.clone();
        let effect = engine.effect_with(
            move || {
                view.get("n");
            },
            EffectOptions::new().scheduler(move |_runner| {
                scheduled_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        state.set("n", 2).unwrap();
        state.set("n", 3).unwrap();
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_does_not_react_after_disposal() {
        let engine = Engine::new();
        let state = engine.reactive(&Target::record_from([("n", 1)])).into_record().unwrap();
        let run_count = Arc::new(AtomicI32::new(0));

        let view = state.clone();
        let run_count_clone = run_count.clone();
        let effect = engine.effect(move || {
            view.get("n");
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(effect.dependency_count(), 0);

        // Writes no longer reach it
        state.set("n", 2).unwrap();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        // Explicit runs still call the body, untracked
        effect.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn effect_clone_shares_state() {
        let engine = Engine::new();
        let effect1 = engine.effect(|| {});
        let effect2 = effect1.clone();

        // Same ID
        assert_eq!(effect1.id(), effect2.id());

        // Shared run count
        assert_eq!(effect1.run_count(), 1);
        effect1.run();
        assert_eq!(effect2.run_count(), 2);

        // Shared disposal state
        effect1.dispose();
        assert!(effect2.is_disposed());
        assert!(effect2.runner().is_disposed());
    }
}
