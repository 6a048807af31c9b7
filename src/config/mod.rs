//! Configuration management
//!
//! Policy values for the selection engine and clipboard façade, backend
//! selection and logging, loaded from TOML. Every section has defaults, so
//! a file only needs the values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use btk_selection_backends::x11::X11Server;
use btk_selection_backends::{BackendFactory, BackendKind};

pub mod types;

pub use types::{BackendConfig, ClipboardPolicy, LoggingConfig, SelectionPolicy};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Conversion engine policy
    #[serde(default)]
    pub selection: SelectionPolicy,
    /// Clipboard façade policy
    #[serde(default)]
    pub clipboard: ClipboardPolicy,
    /// Platform backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Parsed backend kind
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.backend
            .kind
            .parse::<BackendKind>()
            .context("Invalid backend kind")
    }

    /// Factory for the configured platform.
    ///
    /// An X11 backend gets a fresh server with the configured request size
    /// limit, running a clipboard manager if asked to.
    pub fn backend_factory(&self) -> Result<BackendFactory> {
        let factory = match self.backend_kind()? {
            BackendKind::X11 => {
                let server = X11Server::with_max_request_size(self.backend.max_request_size);
                if self.backend.clipboard_manager {
                    server.start_clipboard_manager();
                }
                BackendFactory::with_x11_server(server)
            }
            kind => BackendFactory::new(kind),
        };
        Ok(factory)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.backend_kind()?;

        if self.selection.idle_abort_ticks == 0 {
            anyhow::bail!("idle_abort_ticks must be at least 1");
        }
        if self.selection.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be at least 1");
        }
        if self.selection.max_chunk_size == 0 {
            anyhow::bail!("max_chunk_size must be at least 1");
        }
        if self.backend.max_request_size <= self.selection.request_size_margin {
            anyhow::bail!(
                "max_request_size ({}) must exceed request_size_margin ({})",
                self.backend.max_request_size,
                self.selection.request_size_margin
            );
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }
}
