//! # btk-selection-backends
//!
//! Platform adapters for the BTK selection subsystem.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        btk-selection-backends                        │
//! │                                                                      │
//! │  ┌─────────────────────────┐        ┌─────────────────────────────┐  │
//! │  │ SelectionTransport      │        │ ClipboardBackend (trait)    │  │
//! │  │ (ICCCM, property based) │        │ (native, delayed render)    │  │
//! │  │  - X11Connection        │        │  - Win32Backend             │  │
//! │  └───────────┬─────────────┘        │  - QuartzBackend            │  │
//! │              │                      └──────────────┬──────────────┘  │
//! │              ▼                                     ▼                 │
//! │  ┌─────────────────────────┐        ┌─────────────────────────────┐  │
//! │  │ X11Server               │        │ Win32Clipboard /            │  │
//! │  │  + clipboard manager    │        │ QuartzPasteboards           │  │
//! │  └─────────────────────────┘        └─────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`BackendFactory`] hands out [`PlatformConnection`]s that share one
//! system, so two connections behave like two applications on the same
//! desktop.
//!
//! ## Usage
//!
//! ```rust
//! use btk_selection_backends::x11::X11Server;
//! use btk_selection_backends::SelectionTransport;
//! use btk_selection_core::atoms;
//!
//! let server = X11Server::new();
//! let app = server.connect();
//! let window = app.create_window();
//! assert!(app.set_selection_owner(Some(window), atoms::PRIMARY, 0));
//! assert_eq!(app.selection_owner(atoms::PRIMARY), Some(window));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod backend;
mod error;
mod factory;
mod transport;

pub mod quartz;
pub mod win32;
pub mod x11;

pub use backend::{ClipboardBackend, PasteboardOwner};
pub use error::{BackendError, BackendResult};
pub use factory::{BackendFactory, BackendKind, PlatformConnection};
pub use transport::{
    PropMode, Property, PropertyState, SelectionTransport, Timestamp, TransportEvent, WindowId, CURRENT_TIME,
};

// Re-export core types for convenience
pub use btk_selection_core;
pub use btk_selection_core::{Atom, SelectionData};
