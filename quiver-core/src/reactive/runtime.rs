//! Reactive Runtime
//!
//! The [`Engine`] is the central coordinator that connects targets,
//! effects, computed values and watchers. It owns every piece of shared
//! state the reactive system needs:
//!
//! - the subscription store (`(target, key)` → subscribers)
//! - the context stack of running computations
//! - the table of live façades, so a target wraps to one façade per mode
//! - the job queue and the microtask host that flushes it
//!
//! # How It Works
//!
//! 1. A façade read calls [`Engine::record_read`], which subscribes the
//!    computation on top of the context stack to that slot.
//!
//! 2. A façade write calls [`Engine::invalidate`], which snapshots the
//!    affected computations (excluding the one currently running) and then
//!    dispatches each of them:
//!    a. computations with a scheduler are handed to it
//!    b. the rest re-run synchronously, before `invalidate` returns
//!
//! 3. Scheduled jobs land in the job queue and run in one flush after the
//!    current turn, on whatever [`MicrotaskHost`] the engine was built with.
//!
//! # Ownership
//!
//! Engines are cheap handles around one shared state. Façades, computations
//! and schedulers only hold a [`WeakEngine`], so dropping the last `Engine`
//! releases every subscription. Separate engines share nothing.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::computed::Computed;
use super::context::{ContextGuard, ContextStack};
use super::effect::{ComputationRef, Effect, EffectOptions, Runner, Scheduler};
use super::reference::Ref;
use super::subscriber::ComputationId;
use super::watch::{self, WatchOptions, Watcher};
use crate::config::EngineConfig;
use crate::graph::{
    Change, FieldKey, Job, JobQueue, LocalMicrotasks, Microtask, MicrotaskHost, MutationKind,
    SubscriptionStore,
};
use crate::value::{Shape, Target, TargetId, Value};
use crate::wrap::{Facade, Reactive, WrapFlags};

enum Host {
    Local(LocalMicrotasks),
    External(Arc<dyn MicrotaskHost>),
}

impl Host {
    fn queue(&self, task: Microtask) {
        match self {
            Host::Local(queue) => queue.queue_microtask(task),
            Host::External(host) => host.queue_microtask(task),
        }
    }
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    store: Mutex<SubscriptionStore>,
    context: ContextStack,
    wrappers: DashMap<(TargetId, WrapFlags), Weak<Facade>>,
    jobs: JobQueue,
    host: Host,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        debug!(
            targets = self.store.get_mut().target_count(),
            "reactive engine dropped"
        );
    }
}

/// A reactive engine.
///
/// # Example
///
/// ```rust
/// use quiver_core::{Engine, Target};
///
/// let engine = Engine::new();
/// let user = engine
///     .reactive(&Target::record_from([("first", "Ada"), ("last", "Lovelace")]))
///     .into_record()
///     .unwrap();
///
/// let view = user.clone();
/// let full_name = engine.computed(move || format!("{} {}", view.get("first"), view.get("last")));
/// assert_eq!(full_name.get(), "Ada Lovelace");
///
/// user.set("first", "Augusta").unwrap();
/// assert_eq!(full_name.get(), "Augusta Lovelace");
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// A non-owning handle to an [`Engine`].
#[derive(Clone, Default)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    /// The engine, if it is still alive.
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl fmt::Debug for WeakEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEngine")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with default configuration whose microtasks are drained by
    /// [`run_microtasks`](Self::run_microtasks).
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// An engine with the given configuration and a local microtask queue.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, Host::Local(LocalMicrotasks::new()))
    }

    /// An engine that queues its flushes on `host`.
    pub fn with_host(config: EngineConfig, host: Arc<dyn MicrotaskHost>) -> Self {
        Self::build(config, Host::External(host))
    }

    fn build(config: EngineConfig, host: Host) -> Self {
        debug!(
            max_depth = config.max_depth,
            max_flush_passes = config.max_flush_passes,
            "reactive engine created"
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                store: Mutex::new(SubscriptionStore::new()),
                context: ContextStack::new(),
                wrappers: DashMap::new(),
                jobs: JobQueue::new(),
                host,
            }),
        }
    }

    /// A handle that does not keep the engine alive.
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn context(&self) -> &ContextStack {
        &self.inner.context
    }

    fn store(&self) -> MutexGuard<'_, SubscriptionStore> {
        self.inner.store.lock()
    }

    /// Whether two handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- Wrapping ----

    /// Deep, mutable façade over `target`.
    pub fn reactive(&self, target: &Target) -> Reactive {
        self.wrap(target, WrapFlags::default())
    }

    /// Mutable façade whose reads return nested composites raw.
    pub fn shallow_reactive(&self, target: &Target) -> Reactive {
        self.wrap(target, WrapFlags::SHALLOW)
    }

    /// Deep façade that rejects writes and records no reads.
    pub fn readonly(&self, target: &Target) -> Reactive {
        self.wrap(target, WrapFlags::READONLY)
    }

    /// Readonly façade whose reads return nested composites raw.
    pub fn shallow_readonly(&self, target: &Target) -> Reactive {
        self.wrap(target, WrapFlags::SHALLOW_READONLY)
    }

    /// Façade over `target` in the given mode.
    ///
    /// While a façade for `(target, flags)` is alive, wrapping again returns
    /// the same façade.
    pub fn wrap(&self, target: &Target, flags: WrapFlags) -> Reactive {
        let mut slot = self.inner.wrappers.entry((target.id(), flags)).or_default();
        if let Some(existing) = slot.upgrade() {
            return Reactive::from_facade(existing);
        }

        let facade = Arc::new(Facade::new(self.downgrade(), target.clone(), flags));
        *slot = Arc::downgrade(&facade);
        drop(slot);

        trace!(target_id = target.id().raw(), ?flags, "wrapped target");
        Reactive::from_facade(facade)
    }

    /// Drop a dead façade's table entry.
    pub(crate) fn forget_facade(&self, target: TargetId, flags: WrapFlags) {
        self.inner
            .wrappers
            .remove_if(&(target, flags), |_, weak| weak.strong_count() == 0);
    }

    // ---- Computations ----

    /// Register an effect and run it once.
    pub fn effect<T, F>(&self, body: F) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.effect_with(body, EffectOptions::default())
    }

    /// Register an effect with a scheduler and/or lazily.
    pub fn effect_with<T, F>(&self, body: F, options: EffectOptions) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Effect::new(self.downgrade(), body, options.scheduler);
        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// A lazily evaluated, memoized derived value.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new(self, getter)
    }

    /// Call `callback(new, old)` whenever the value produced by `getter`
    /// changes.
    pub fn watch<T, G, C>(&self, getter: G, callback: C, options: WatchOptions) -> Watcher
    where
        T: Send + Sync + 'static,
        G: Fn() -> T + Send + Sync + 'static,
        C: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        watch::register(self, getter, callback, options)
    }

    /// Watch every field reachable from `source`.
    pub fn watch_reactive<C>(&self, source: &Reactive, callback: C, options: WatchOptions) -> Watcher
    where
        C: Fn(&Reactive, Option<&Reactive>) + Send + Sync + 'static,
    {
        watch::register_deep(self, source.clone(), callback, options)
    }

    /// A reactive single-value cell.
    pub fn ref_value(&self, value: impl Into<Value>) -> Ref {
        Ref::new(self, value)
    }

    /// Run `f` without recording any reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = ContextGuard::untracked(self);
        f()
    }

    // ---- Tracking and invalidation ----

    /// Subscribe the running computation, if any, to `(target, key)`.
    pub fn record_read(&self, target: TargetId, key: FieldKey) {
        let Some(computation) = self.inner.context.tracking_subscriber() else {
            return;
        };

        trace!(
            target_id = target.raw(),
            %key,
            computation = %computation.state().id(),
            "recorded read"
        );
        let dep = self.store().dep_set(target, key);
        dep.subscribe(&computation);
    }

    /// Notify the subscribers of one slot that it changed.
    pub fn invalidate(&self, target: TargetId, shape: Shape, key: FieldKey, kind: MutationKind) {
        self.invalidate_batch(target, shape, &[Change::new(key, kind)], None);
    }

    /// Notify the subscribers of several slots of one target at once.
    ///
    /// Subscribers of more than one changed slot are dispatched once.
    /// `truncate_from` also selects every index at or beyond it.
    pub fn invalidate_batch(
        &self,
        target: TargetId,
        shape: Shape,
        changes: &[Change],
        truncate_from: Option<usize>,
    ) {
        let exclude = self.inner.context.active_id();
        let snapshot = self
            .store()
            .collect(target, shape, changes, truncate_from, exclude);
        if snapshot.is_empty() {
            return;
        }

        trace!(
            target_id = target.raw(),
            changes = changes.len(),
            computations = snapshot.len(),
            "invalidating"
        );
        for computation in snapshot {
            self.dispatch(computation);
        }
    }

    fn dispatch(&self, computation: ComputationRef) {
        if computation.state().is_disposed() {
            return;
        }

        if let Some(scheduler) = computation.state().scheduler().cloned() {
            scheduler(&Runner::new(computation));
            return;
        }

        let depth = self.depth();
        if depth >= self.inner.config.max_depth {
            warn!(
                depth,
                computation = %computation.state().id(),
                "computation depth limit reached, dropping re-run"
            );
            return;
        }

        computation.rerun();
    }

    // ---- Jobs ----

    /// Queue a job for the next flush. A job already pending is not queued
    /// twice.
    pub fn queue_job(&self, job: impl Into<Job>) {
        if self.inner.jobs.push(job.into()) {
            let engine = self.downgrade();
            self.queue_microtask(Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.flush_jobs();
                }
            }));
        }
    }

    /// A scheduler that routes re-runs through [`queue_job`](Self::queue_job).
    pub fn queue_scheduler(&self) -> Scheduler {
        let engine = self.downgrade();
        Arc::new(move |runner: &Runner| {
            if let Some(engine) = engine.upgrade() {
                engine.queue_job(runner.clone());
            }
        })
    }

    /// Run pending jobs now. Returns how many ran.
    pub fn flush_jobs(&self) -> usize {
        self.inner.jobs.flush(self.inner.config.max_flush_passes)
    }

    /// Drain the engine-owned microtask queue. Returns how many tasks ran.
    ///
    /// Engines built with [`with_host`](Self::with_host) have no local queue
    /// and return 0.
    pub fn run_microtasks(&self) -> usize {
        match &self.inner.host {
            Host::Local(queue) => queue.run_all(),
            Host::External(_) => 0,
        }
    }

    /// Queue `task` on the engine's microtask host.
    pub fn queue_microtask(&self, task: Microtask) {
        self.inner.host.queue(task);
    }

    // ---- Introspection ----

    /// Number of jobs waiting for the next flush.
    pub fn pending_jobs(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Number of computations currently running.
    pub fn depth(&self) -> usize {
        self.inner.context.depth()
    }

    /// Whether a read right now would be recorded.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_tracking()
    }

    /// ID of the innermost running computation.
    pub fn active_computation(&self) -> Option<ComputationId> {
        self.inner.context.active_id()
    }

    /// Number of computations subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: &FieldKey) -> usize {
        self.store().subscriber_count(target, key)
    }

    /// Number of targets with recorded subscriptions.
    pub fn tracked_targets(&self) -> usize {
        self.store().target_count()
    }

    /// Forget every subscription to `target` and its façade entries.
    pub fn release(&self, target: TargetId) -> bool {
        // Detached sets are dropped after the store lock is released.
        let detached = self.store().release(target);
        self.inner.wrappers.retain(|(id, _), _| *id != target);

        let released = detached.is_some();
        drop(detached);
        if released {
            debug!(target_id = target.raw(), "released target");
        }
        released
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("tracked_targets", &self.tracked_targets())
            .field("pending_jobs", &self.pending_jobs())
            .field("flush_pending", &self.inner.jobs.is_flush_pending())
            .field("depth", &self.depth())
            .finish()
    }
}
