//! # btk-selection
//!
//! Selection and clipboard subsystem of the BTK toolkit.
//!
//! This is the orchestration crate that integrates:
//! - [`btk_selection_core`] - atoms, target lists, selection data and codecs
//! - [`btk_selection_backends`] - the X11 selection transport and the Win32 and
//!   Quartz pasteboard adapters
//!
//! # Architecture
//!
//! ```text
//! btk-selection
//!   ├─> MainLoop          (single-threaded dispatch: sources, timers, idles)
//!   ├─> SelectionContext  (one per process: displays, widgets, ownership)
//!   │     ├─> Ownership table   (who owns which selection, since when)
//!   │     └─> Engine            (conversions, MULTIPLE, INCR send/receive)
//!   └─> Clipboard         (per display + selection façade)
//!         ├─> SelectionPlatform  (X11, through the engine)
//!         └─> NativePlatform     (Win32 / Quartz pasteboards)
//! ```
//!
//! # Data Flow
//!
//! **Paste:** `Clipboard::request_*` → engine retrieval → owner's provider →
//! `SelectionNotify` (or INCR chunks) → callback
//!
//! **Copy:** `Clipboard::set_*` → ownership claim → `SelectionRequest` from a
//! requestor → provider callback → property write
//!
//! # Example
//!
//! ```rust
//! use btk_selection::prelude::*;
//!
//! let main_loop = MainLoop::with_virtual_clock();
//! let context = SelectionContext::new(main_loop);
//! let display = context.open_display(BackendFactory::new(BackendKind::X11).connect());
//!
//! let clipboard = context.clipboard_for_display(&display, atoms::CLIPBOARD);
//! assert!(clipboard.set_text("hello"));
//! assert_eq!(clipboard.wait_for_text().as_deref(), Some("hello"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Clipboard façade over selections and native pasteboards
pub mod clipboard;

/// Configuration
pub mod config;

/// Selection registry and displays
pub mod context;

/// Cooperative main loop
pub mod mainloop;

/// ICCCM selection ownership and the conversion engine
pub mod selection;

/// Utility functions
pub mod utils;

/// Widget stand-in
pub mod widget;

// =============================================================================
// Re-exports
// =============================================================================

/// Re-export btk-selection-core for the data model
pub use btk_selection_core;

/// Re-export btk-selection-backends for the platform adapters
pub use btk_selection_backends;

pub use clipboard::{snap_timestamp, Clipboard, ClipboardClearFunc, ClipboardGetFunc, OwnerChangeEvent, UserData};
pub use config::Config;
pub use context::{Display, SelectionContext};
pub use mainloop::{MainLoop, SourceId};
pub use widget::{HandlerId, SelectionEvent, Widget, WidgetId};

/// Common imports for applications
pub mod prelude {
    pub use crate::clipboard::{Clipboard, OwnerChangeEvent, UserData};
    pub use crate::context::{Display, SelectionContext};
    pub use crate::mainloop::MainLoop;
    pub use crate::widget::{SelectionEvent, Widget};
    pub use btk_selection_backends::{BackendFactory, BackendKind, PlatformConnection, Timestamp, CURRENT_TIME};
    pub use btk_selection_core::prelude::*;
}
