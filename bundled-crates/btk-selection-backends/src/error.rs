//! Error types for platform adapters.

use btk_selection_core::SelectionError;
use thiserror::Error;

/// Errors raised while selecting or connecting a platform adapter.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Error from the selection core library
    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Backend name not recognized
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

/// Result type for platform adapter operations.
pub type BackendResult<T> = Result<T, BackendError>;
