//! Configuration section types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Conversion engine policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Sweep ticks without transport activity before an INCR send or a
    /// retrieval is abandoned
    pub idle_abort_ticks: u32,

    /// Sweep period in milliseconds
    pub tick_interval_ms: u64,

    /// Largest chunk written in one INCR step
    pub max_chunk_size: usize,

    /// Bytes of a transport request reserved for the request header
    pub request_size_margin: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            idle_abort_ticks: 30,
            tick_interval_ms: 1000,
            max_chunk_size: 262_144,
            request_size_margin: 100,
        }
    }
}

impl SelectionPolicy {
    /// Largest single property write for a transport accepting
    /// `max_request_size` bytes per request.
    pub fn chunk_size_for(&self, max_request_size: usize) -> usize {
        self.max_chunk_size
            .min(max_request_size.saturating_sub(self.request_size_margin))
            .max(1)
    }
}

/// Clipboard façade policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardPolicy {
    /// Hard limit for the store-on-exit handshake, in milliseconds
    pub store_timeout_ms: u64,

    /// Cache TARGETS replies when the platform reports owner changes
    pub cache_targets: bool,
}

impl Default for ClipboardPolicy {
    fn default() -> Self {
        Self {
            store_timeout_ms: 10_000,
            cache_targets: true,
        }
    }
}

/// Platform backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// "x11", "win32" or "quartz"
    pub kind: String,

    /// Request size limit of the in-process X11 server
    pub max_request_size: usize,

    /// Run a clipboard manager on the X11 server
    pub clipboard_manager: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "x11".to_string(),
            max_request_size: btk_selection_backends::x11::DEFAULT_MAX_REQUEST_SIZE,
            clipboard_manager: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    pub format: String,

    /// Directory for log files (None = console only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}
