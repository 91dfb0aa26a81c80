//! Quiver Core
//!
//! This crate provides a fine-grained reactive engine: it observes reads and
//! writes against a graph of mutable records, lists and maps, records which
//! computations depend on which fields, and re-runs exactly the affected
//! computations when a field changes.
//!
//! It implements:
//!
//! - Reactive façades over raw targets (deep, shallow and readonly)
//! - Effects with optional schedulers and lazy execution
//! - Memoized computed values
//! - Watchers with old/new values and deep traversal
//! - A deduplicating job queue flushed on a microtask host
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: raw targets and the dynamic values stored in them
//! - `graph`: the subscription store and the job queue
//! - `reactive`: the engine, effects, computed values and watchers
//! - `wrap`: the façades that turn field access into tracking calls
//! - `config` and `error`: engine configuration and error types
//!
//! # Example
//!
//! ```rust
//! use quiver_core::{Engine, Target, WatchOptions};
//!
//! let engine = Engine::new();
//! let todos = engine.reactive(&Target::list()).into_list().unwrap();
//!
//! // Derived value
//! let view = todos.clone();
//! let count = engine.computed(move || view.len());
//!
//! // Side effect
//! let counter = count.clone();
//! engine.effect(move || println!("{} todos", counter.get()));
//!
//! // Reaction with old and new values
//! engine.watch(
//!     move || count.get(),
//!     |new, old| println!("count went from {old:?} to {new}"),
//!     WatchOptions::default(),
//! );
//!
//! todos.push("write docs").unwrap();
//! // Prints: "1 todos" and "count went from Some(0) to 1"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod value;
pub mod wrap;

pub use config::EngineConfig;
pub use error::ReactiveError;
pub use graph::{Change, FieldKey, Job, LocalMicrotasks, MicrotaskHost, MutationKind, TokioHost};
pub use reactive::{
    Computed, ComputationId, Effect, EffectOptions, Engine, Flush, Ref, Runner, Scheduler,
    WatchOptions, Watcher, WeakEngine,
};
pub use value::{Shape, Target, TargetData, TargetId, Value};
pub use wrap::{Observable, Reactive, ReactiveList, ReactiveMap, ReactiveRecord, WrapFlags};
