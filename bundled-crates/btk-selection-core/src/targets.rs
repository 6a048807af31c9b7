//! Target lists: the ordered set of formats a peer offers or accepts.
//!
//! A [`TargetList`] is shared: cloning it hands out another reference to the
//! same entries, and the entries are freed when the last reference is dropped.
//! Order matters; earlier entries are preferred.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::atoms::{self, Atom};

/// Restrictions on who may use a target (drag and drop only; the selection
/// engine ignores them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetFlags(u32);

impl TargetFlags {
    /// No restriction
    pub const NONE: Self = Self(0);
    /// Only within the same application
    pub const SAME_APP: Self = Self(1 << 0);
    /// Only within the same widget
    pub const SAME_WIDGET: Self = Self(1 << 1);
    /// Only to other applications
    pub const OTHER_APP: Self = Self(1 << 2);
    /// Only to other widgets
    pub const OTHER_WIDGET: Self = Self(1 << 3);

    /// Create flags from raw bits
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check whether all bits of `flag` are set
    pub fn has_flag(&self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

impl std::ops::BitOr for TargetFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One advertised format and the application tag dispatched with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetEntry {
    /// Format identifier
    pub target: Atom,
    /// Usage restrictions
    pub flags: TargetFlags,
    /// Opaque tag handed back to the provider callback
    pub info: u32,
}

impl TargetEntry {
    /// Create an entry
    pub fn new(target: Atom, flags: TargetFlags, info: u32) -> Self {
        Self { target, flags, info }
    }
}

/// Shared, ordered list of [`TargetEntry`] values.
#[derive(Clone, Default)]
pub struct TargetList {
    inner: Rc<RefCell<Vec<TargetEntry>>>,
}

impl TargetList {
    /// Create a list holding a copy of `initial`.
    pub fn new(initial: &[TargetEntry]) -> Self {
        Self {
            inner: Rc::new(RefCell::new(initial.to_vec())),
        }
    }

    /// Create a list from a table; same as [`TargetList::new`].
    pub fn from_table(table: &[TargetEntry]) -> Self {
        Self::new(table)
    }

    /// Number of live references to this list.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// True when both handles refer to the same list.
    pub fn ptr_eq(&self, other: &TargetList) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Append one entry.
    pub fn add(&self, target: Atom, flags: TargetFlags, info: u32) {
        self.inner.borrow_mut().push(TargetEntry::new(target, flags, info));
    }

    /// Prepend a table, keeping the table's own order.
    pub fn add_table(&self, table: &[TargetEntry]) {
        let mut entries = self.inner.borrow_mut();
        for entry in table.iter().rev() {
            entries.insert(0, *entry);
        }
    }

    /// Append every text target this crate can convert to.
    pub fn add_text_targets(&self, info: u32) {
        for target in [
            atoms::UTF8_STRING,
            atoms::COMPOUND_TEXT,
            atoms::TEXT,
            atoms::STRING,
            atoms::TEXT_PLAIN_UTF8,
            atoms::TEXT_PLAIN,
        ] {
            self.add(target, TargetFlags::NONE, info);
        }
    }

    /// Append caller-supplied rich text formats in order.
    pub fn add_rich_text_targets(&self, info: u32, formats: &[Atom]) {
        for &target in formats {
            self.add(target, TargetFlags::NONE, info);
        }
    }

    /// Append the mime types of every registered image codec, png first.
    ///
    /// With `writable` set, codecs that can only decode are skipped.
    pub fn add_image_targets(&self, info: u32, writable: bool) {
        #[cfg(feature = "image")]
        for codec in crate::image::codecs() {
            if writable && !codec.writable {
                continue;
            }
            for mime in codec.mime_types {
                self.add(Atom::intern(mime), TargetFlags::NONE, info);
            }
        }
        #[cfg(not(feature = "image"))]
        let _ = (info, writable);
    }

    /// Append `text/uri-list`.
    pub fn add_uri_targets(&self, info: u32) {
        self.add(atoms::TEXT_URI_LIST, TargetFlags::NONE, info);
    }

    /// Look up `target`, returning its info tag when present.
    pub fn find(&self, target: Atom) -> Option<u32> {
        self.inner
            .borrow()
            .iter()
            .find(|entry| entry.target == target)
            .map(|entry| entry.info)
    }

    /// Remove the first entry for `target`.
    pub fn remove(&self, target: Atom) {
        let mut entries = self.inner.borrow_mut();
        if let Some(pos) = entries.iter().position(|entry| entry.target == target) {
            entries.remove(pos);
        }
    }

    /// Snapshot of the entries.
    pub fn entries(&self) -> Vec<TargetEntry> {
        self.inner.borrow().clone()
    }

    /// Snapshot of the target atoms, in order.
    pub fn targets(&self) -> Vec<Atom> {
        self.inner.borrow().iter().map(|entry| entry.target).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// True when the list has no entries
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl fmt::Debug for TargetList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.borrow().iter()).finish()
    }
}

/// Copy the entries of a list into a standalone table.
pub fn target_table_new_from_list(list: &TargetList) -> Vec<TargetEntry> {
    list.entries()
}
