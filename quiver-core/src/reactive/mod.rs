//! Reactive Primitives
//!
//! This module implements the computations of the reactive system: effects,
//! computed values and watchers, plus the engine that runs them.
//!
//! # Concepts
//!
//! ## Effects
//!
//! An Effect is a computation whose reads are recorded while it runs. When
//! any slot it read is written, it re-runs (or is handed to its scheduler).
//! Its dependency set is rebuilt on every run.
//!
//! ## Computed values
//!
//! A Computed value caches the result of a getter. Writes to the getter's
//! inputs only mark it dirty; the getter runs again on the next read.
//!
//! ## Watchers
//!
//! A Watcher calls back with the new and the previous value of a getter, or
//! fires on any nested change of a reactive container.
//!
//! # Implementation Notes
//!
//! Tracking is automatic: each engine keeps a stack of running computations,
//! and a façade read subscribes whatever computation is on top. This is the
//! scheme used by Vue 3, SolidJS and Leptos.

mod computed;
mod context;
mod effect;
mod reference;
mod runtime;
mod subscriber;
mod watch;

pub use computed::Computed;
pub(crate) use context::ContextGuard;
pub use effect::{Effect, EffectOptions, Runner, Scheduler};
pub(crate) use effect::ComputationRef;
pub use reference::Ref;
pub use runtime::{Engine, WeakEngine};
pub use subscriber::ComputationId;
pub use watch::{Flush, WatchOptions, Watcher};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::effect::{Computation, ComputationState};
    use super::{ComputationRef, WeakEngine};

    struct Idle {
        state: ComputationState,
    }

    impl Computation for Idle {
        fn state(&self) -> &ComputationState {
            &self.state
        }

        fn rerun(self: Arc<Self>) {}
    }

    /// A computation that does nothing when run, for store and stack tests.
    pub(crate) fn idle_computation() -> ComputationRef {
        Arc::new(Idle {
            state: ComputationState::new(WeakEngine::default(), None),
        })
    }
}
