//! # btk-selection-core
//!
//! Data model for the BTK selection and clipboard subsystem.
//!
//! This crate holds everything that does not depend on a display connection:
//!
//! - **[`Atom`]** - interned format identifiers and the well-known atoms
//! - **[`TargetList`]** - shared, ordered lists of offered formats
//! - **[`SelectionData`]** - the typed, NUL-padded payload of a conversion
//! - **[`text`]** - Latin-1, COMPOUND_TEXT, line ending and URI list codecs
//! - **[`formats`]** - Win32 clipboard format ids and conversions
//! - **[`transfer`]** - INCR chunk cursor and receive-side assembler
//!
//! ## Quick Start
//!
//! ```rust
//! use btk_selection_core::{atoms, SelectionData, TargetList};
//!
//! let targets = TargetList::default();
//! targets.add_text_targets(0);
//! assert_eq!(targets.find(atoms::UTF8_STRING), Some(0));
//!
//! let mut data = SelectionData::new(atoms::CLIPBOARD, atoms::STRING);
//! assert!(data.set_text("hello"));
//! assert_eq!(data.text().as_deref(), Some("hello"));
//! ```
//!
//! ## Feature Flags
//!
//! - `image` (default) - [`image::Pixbuf`], the codec registry and DIB/native bitmap marshaling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod error;
mod selection_data;
mod targets;

pub mod atoms;
pub mod formats;
pub mod text;
pub mod transfer;

#[cfg(feature = "image")]
#[cfg_attr(docsrs, doc(cfg(feature = "image")))]
pub mod image;

pub use atoms::{atoms_from_bytes, atoms_to_bytes, Atom};
pub use error::{SelectionError, SelectionResult};
pub use formats::{ClipboardFormat, FormatConverter};
pub use selection_data::{
    bytes_per_item, targets_include_image, targets_include_rich_text, targets_include_text, targets_include_uri,
    DisplayId, SelectionData,
};
pub use targets::{target_table_new_from_list, TargetEntry, TargetFlags, TargetList};
pub use transfer::{ChunkAssembler, IncrCursor, IncrOffset};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::atoms;
    pub use crate::{Atom, DisplayId, SelectionData, SelectionError, SelectionResult, TargetEntry, TargetFlags, TargetList};
}
