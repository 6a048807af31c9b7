//! Native clipboard backend trait.
//!
//! Platforms without an ICCCM-style server expose one system pasteboard per
//! selection. An owner declares the targets it offers and renders each one
//! lazily: the first `get` of a declared but unrendered target calls back
//! into the owner and caches the result.

use std::fmt::Debug;
use std::rc::Rc;

use btk_selection_core::{Atom, SelectionData, SelectionResult};

/// The application side of a pasteboard declaration.
#[cfg_attr(test, mockall::automock)]
pub trait PasteboardOwner {
    /// Render `target`; rejected data means the owner can't provide it.
    fn provide(&self, target: Atom) -> SelectionData;

    /// Another declaration replaced this owner's.
    fn ownership_lost(&self);
}

/// A native system pasteboard.
pub trait ClipboardBackend {
    /// Platform identifier for a data format
    type PlatformType: Clone + PartialEq + Debug;

    /// Short backend name for logging
    fn name(&self) -> &'static str;

    /// Take ownership of `selection` and declare `targets` for delayed rendering.
    ///
    /// Returns the pasteboard's change count after the declaration. The
    /// previous owner, if any, is told it lost ownership.
    fn declare(&self, selection: Atom, targets: &[Atom], owner: Rc<dyn PasteboardOwner>) -> i64;

    /// Write rendered data for its target.
    fn put(&self, selection: Atom, data: &SelectionData) -> SelectionResult<()>;

    /// Read `target`, rendering it through the owner if needed.
    ///
    /// TARGETS is answered with the available targets as ATOM/32.
    fn get(&self, selection: Atom, target: Atom) -> SelectionData;

    /// Targets currently offered on `selection`.
    fn available_targets(&self, selection: Atom) -> Vec<Atom>;

    /// Monotonic counter bumped whenever ownership changes.
    fn change_count(&self, selection: Atom) -> i64;

    /// Empty `selection` and drop its owner.
    fn release(&self, selection: Atom);

    /// Platform type for a target name.
    fn format_name_to_platform_type(&self, name: &str) -> Self::PlatformType;

    /// Target name for a platform type.
    fn platform_type_to_format_name(&self, ty: &Self::PlatformType) -> String;
}
