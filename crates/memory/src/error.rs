//! Internal error taxonomy for the memory crate.
//!
//! None of the public facade operations in [`crate::manager::MemoryManager`]
//! return `Result` — failure is already encoded as `false`/empty per the
//! error-handling policy table. `MemoryError` exists for plumbing between a
//! capability implementation and the store that calls it, and for worker
//! diagnostics, not for the public API surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("malformed stream entry: {0}")]
    DecodeError(String),

    #[error("embedder call failed: {0}")]
    EmbedError(String),

    #[error("preference write lost the optimistic race (expected version {expected})")]
    VersionConflict { expected: i64 },

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        MemoryError::Other(err.to_string())
    }
}
