//! Engine Configuration
//!
//! Tunables that bound how far the engine is willing to recurse or loop
//! while propagating changes. Every field has a default, so an empty JSON
//! object is a valid configuration.

use serde::Deserialize;

use crate::error::ReactiveError;

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Active-computation stack depth at which synchronous re-runs are
    /// dropped instead of executed.
    pub max_depth: usize,

    /// Maximum number of drain passes in a single job-queue flush.
    pub max_flush_passes: usize,

    /// Emit a warning when a readonly façade rejects a write.
    pub warn_on_readonly: bool,

    /// Longest length an index or length write may grow a list to.
    pub max_list_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 128,
            max_flush_passes: 64,
            warn_on_readonly: true,
            max_list_len: 1 << 24,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self, ReactiveError> {
        serde_json::from_str(source).map_err(|e| ReactiveError::Config(e.to_string()))
    }
}
