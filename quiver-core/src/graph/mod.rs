//! Dependency Graph
//!
//! This module holds the two shared structures every computation goes
//! through: the subscription store that records which computation read which
//! slot, and the job queue that batches scheduled re-runs.
//!
//! # Overview
//!
//! The graph is bipartite:
//!
//! - Slots are `(TargetId, FieldKey)` pairs, one per observable field of a
//!   raw target.
//! - Computations are effects, computed values and watchers.
//!
//! An edge from a slot to a computation means the computation read that slot
//! during its latest run. Edges are rebuilt on every run; a write collects the
//! computations on the written slot (plus the structural keys the write
//! affects) into a snapshot and dispatches them.
//!
//! # Design Decisions
//!
//! 1. The store is keyed by generated target IDs, never by the targets
//!    themselves, so observation does not keep data alive.
//!
//! 2. Subscriber sets are insertion-ordered, which makes dispatch order
//!    deterministic within one run.
//!
//! 3. Computations keep weak reverse edges to the sets they joined, so
//!    cleanup before a re-run is proportional to the previous dependency
//!    count.

mod scheduler;
mod store;

pub use scheduler::{Job, LocalMicrotasks, Microtask, MicrotaskHost, TokioHost};
pub(crate) use scheduler::JobQueue;
pub use store::{Change, FieldKey, MutationKind};
pub(crate) use store::{DepSet, SubscriptionStore};
