//! Reactive Context
//!
//! The context stack records which computation is currently running, so
//! that a read can subscribe it and a write can avoid re-triggering it.
//!
//! # Implementation
//!
//! Each engine owns one stack. Running a computation pushes a computation
//! frame; [`Engine::untracked`](crate::Engine::untracked) and the bulk list
//! methods push an untracked frame. Reads are recorded only when the top
//! frame is a computation frame. The nearest computation frame stays the
//! *active* computation even under an untracked frame, which keeps the
//! self-trigger exclusion working inside bulk writes.
//!
//! Frames are popped by [`ContextGuard`] in `Drop`, so a panicking body
//! unwinds with the stack intact.

use parking_lot::Mutex;

use super::effect::ComputationRef;
use super::runtime::Engine;
use super::subscriber::ComputationId;

pub(crate) enum Frame {
    Computation(ComputationRef),
    Untracked,
}

impl Frame {
    fn id(&self) -> Option<ComputationId> {
        match self {
            Frame::Computation(computation) => Some(computation.state().id()),
            Frame::Untracked => None,
        }
    }
}

/// The per-engine stack of running computations.
#[derive(Default)]
pub(crate) struct ContextStack {
    frames: Mutex<Vec<Frame>>,
}

impl ContextStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, frame: Frame) {
        self.frames.lock().push(frame);
    }

    fn pop(&self) -> Option<Frame> {
        self.frames.lock().pop()
    }

    /// The computation reads should subscribe, if tracking is on.
    pub(crate) fn tracking_subscriber(&self) -> Option<ComputationRef> {
        match self.frames.lock().last() {
            Some(Frame::Computation(computation)) => Some(computation.clone()),
            _ => None,
        }
    }

    /// The innermost running computation, tracked or not.
    pub(crate) fn active_id(&self) -> Option<ComputationId> {
        self.frames.lock().iter().rev().find_map(Frame::id)
    }

    /// Number of computation frames on the stack.
    pub(crate) fn depth(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|frame| matches!(frame, Frame::Computation(_)))
            .count()
    }

    pub(crate) fn is_tracking(&self) -> bool {
        matches!(self.frames.lock().last(), Some(Frame::Computation(_)))
    }
}

/// Guard that pops its frame when dropped.
///
/// This ensures the stack is properly maintained even if the computation
/// panics.
pub(crate) struct ContextGuard {
    engine: Engine,
    expected: Option<ComputationId>,
}

impl ContextGuard {
    /// Push a computation frame. Reads subscribe `computation` until the
    /// guard drops.
    pub(crate) fn enter(engine: &Engine, computation: ComputationRef) -> Self {
        let expected = Some(computation.state().id());
        engine.context().push(Frame::Computation(computation));
        Self {
            engine: engine.clone(),
            expected,
        }
    }

    /// Push an untracked frame. Reads record nothing until the guard drops.
    pub(crate) fn untracked(engine: &Engine) -> Self {
        engine.context().push(Frame::Untracked);
        Self {
            engine: engine.clone(),
            expected: None,
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let popped = self.engine.context().pop();

        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.id(),
                self.expected,
                "context frame mismatch: expected {:?}, got {:?}",
                self.expected,
                frame.id()
            );
        }
    }
}
