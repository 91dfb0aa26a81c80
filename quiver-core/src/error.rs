//! Error types for the reactive engine.

use thiserror::Error;

use crate::value::Shape;

/// Errors surfaced by reactive façades and engine configuration.
///
/// Most failures in the engine are recovered locally: a write through a
/// readonly façade is a no-op that also logs a warning, and invalidating a
/// target nobody subscribed to does nothing at all. The error is still
/// returned so callers that care can observe it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A write, delete or clear was attempted through a readonly façade.
    #[error("cannot modify key `{key}`: target is readonly")]
    ReadOnly { key: String },

    /// The key does not address a slot of this container shape.
    #[error("key `{key}` is not valid for a {shape} target")]
    InvalidKey { key: String, shape: Shape },

    /// An index or length write would grow a list past the configured
    /// limit.
    #[error("list length {len} exceeds the limit of {max}")]
    ListTooLong { len: usize, max: usize },

    /// The microtask host cannot run flushes after the current turn.
    #[error("unsupported microtask host: {0}")]
    Host(String),

    /// Engine configuration could not be parsed.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

impl ReactiveError {
    pub(crate) fn read_only(key: impl ToString) -> Self {
        Self::ReadOnly { key: key.to_string() }
    }

    pub(crate) fn invalid_key(key: impl ToString, shape: Shape) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            shape,
        }
    }
}
