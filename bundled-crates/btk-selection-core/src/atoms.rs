//! Interned format identifiers.
//!
//! An [`Atom`] is a process-wide unique token for a data type or selection
//! name ("UTF8_STRING", "image/png", "CLIPBOARD"). Interning the same name
//! twice yields the same atom, so atoms compare by identity. Interned names
//! live for the rest of the process.
//!
//! The well-known atoms used by the selection protocol are predefined with
//! fixed ids so they can be used in `const` context.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// An interned format identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Atom(u32);

// =============================================================================
// Predefined atoms
// =============================================================================

/// The null atom ("no property", "rejected")
pub const NONE: Atom = Atom(0);
/// The PRIMARY selection
pub const PRIMARY: Atom = Atom(1);
/// The SECONDARY selection
pub const SECONDARY: Atom = Atom(2);
/// The CLIPBOARD selection
pub const CLIPBOARD: Atom = Atom(3);
/// Type of atom arrays
pub const ATOM: Atom = Atom(4);
/// Type of (target, property) pair arrays used by MULTIPLE
pub const ATOM_PAIR: Atom = Atom(5);
/// Type of TIMESTAMP replies
pub const INTEGER: Atom = Atom(6);
/// Latin-1 text
pub const STRING: Atom = Atom(7);
/// UTF-8 text
pub const UTF8_STRING: Atom = Atom(8);
/// Text in whatever encoding the owner prefers
pub const TEXT: Atom = Atom(9);
/// ISO 2022 compound text
pub const COMPOUND_TEXT: Atom = Atom(10);
/// Request for the list of supported targets
pub const TARGETS: Atom = Atom(11);
/// Batched conversion request
pub const MULTIPLE: Atom = Atom(12);
/// Request for the ownership acquisition time
pub const TIMESTAMP: Atom = Atom(13);
/// Placeholder type announcing an incremental transfer
pub const INCR: Atom = Atom(14);
/// Request asking the owner to let a clipboard manager save its targets
pub const SAVE_TARGETS: Atom = Atom(15);
/// Type of the empty SAVE_TARGETS reply
pub const NULL: Atom = Atom(16);
/// Selection owned by the clipboard manager
pub const CLIPBOARD_MANAGER: Atom = Atom(17);
/// Property used on requestor windows for retrievals
pub const BTK_SELECTION: Atom = Atom(18);
/// ASCII plain text
pub const TEXT_PLAIN: Atom = Atom(19);
/// UTF-8 plain text
pub const TEXT_PLAIN_UTF8: Atom = Atom(20);
/// RFC 2483 URI list
pub const TEXT_URI_LIST: Atom = Atom(21);
/// HTML fragment
pub const TEXT_HTML: Atom = Atom(22);
/// Rich Text Format
pub const TEXT_RTF: Atom = Atom(23);
/// PNG image
pub const IMAGE_PNG: Atom = Atom(24);
/// JPEG image
pub const IMAGE_JPEG: Atom = Atom(25);
/// GIF image
pub const IMAGE_GIF: Atom = Atom(26);
/// BMP image
pub const IMAGE_BMP: Atom = Atom(27);
/// TIFF image
pub const IMAGE_TIFF: Atom = Atom(28);
/// Four 16-bit RGBA components
pub const APPLICATION_X_COLOR: Atom = Atom(29);

const PREDEFINED: [&str; 30] = [
    "NONE",
    "PRIMARY",
    "SECONDARY",
    "CLIPBOARD",
    "ATOM",
    "ATOM_PAIR",
    "INTEGER",
    "STRING",
    "UTF8_STRING",
    "TEXT",
    "COMPOUND_TEXT",
    "TARGETS",
    "MULTIPLE",
    "TIMESTAMP",
    "INCR",
    "SAVE_TARGETS",
    "NULL",
    "CLIPBOARD_MANAGER",
    "BTK_SELECTION",
    "text/plain",
    "text/plain;charset=utf-8",
    "text/uri-list",
    "text/html",
    "text/rtf",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "application/x-color",
];

// =============================================================================
// Interner
// =============================================================================

struct Interner {
    names: Vec<&'static str>,
    ids: HashMap<&'static str, u32>,
}

impl Interner {
    fn new() -> Self {
        let mut interner = Self {
            names: Vec::with_capacity(64),
            ids: HashMap::with_capacity(64),
        };
        for name in PREDEFINED {
            interner.insert(name);
        }
        interner
    }

    fn insert(&mut self, name: &'static str) -> u32 {
        let id = self.names.len() as u32;
        self.names.push(name);
        self.ids.insert(name, id);
        id
    }
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(Interner::new()))
}

impl Atom {
    /// Intern `name`, creating the atom on first use.
    pub fn intern(name: &str) -> Atom {
        let mut interner = interner().lock();
        if let Some(&id) = interner.ids.get(name) {
            return Atom(id);
        }
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let id = interner.insert(leaked);
        tracing::trace!(atom = id, name, "interned atom");
        Atom(id)
    }

    /// Look up `name` without creating it.
    pub fn lookup(name: &str) -> Option<Atom> {
        interner().lock().ids.get(name).copied().map(Atom)
    }

    /// Rebuild an atom from its wire representation.
    pub const fn from_raw(raw: u32) -> Atom {
        Atom(raw)
    }

    /// The wire representation of this atom.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Returns true for the null atom.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The interned name, or an empty string for ids never handed out.
    pub fn name(self) -> &'static str {
        interner().lock().names.get(self.0 as usize).copied().unwrap_or("")
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.name())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for Atom {
    fn from(name: &str) -> Self {
        Atom::intern(name)
    }
}

/// Pack atoms as 32-bit little-endian items.
pub fn atoms_to_bytes(atoms: &[Atom]) -> Vec<u8> {
    atoms.iter().flat_map(|atom| atom.as_raw().to_le_bytes()).collect()
}

/// Unpack 32-bit little-endian items into atoms; a trailing partial item is ignored.
pub fn atoms_from_bytes(data: &[u8]) -> Vec<Atom> {
    data.chunks_exact(4)
        .map(|c| Atom::from_raw(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_names() {
        assert_eq!(UTF8_STRING.name(), "UTF8_STRING");
        assert_eq!(TEXT_PLAIN_UTF8.name(), "text/plain;charset=utf-8");
        assert_eq!(APPLICATION_X_COLOR.name(), "application/x-color");
        assert_eq!(Atom::intern("CLIPBOARD"), CLIPBOARD);
        assert!(NONE.is_none());
    }

    #[test]
    fn test_intern_is_identity() {
        let a = Atom::intern("application/x-btk-test-identity");
        let b = Atom::intern("application/x-btk-test-identity");
        assert_eq!(a, b);
        assert_eq!(a.name(), "application/x-btk-test-identity");
        assert_ne!(a, Atom::intern("application/x-btk-test-other"));
    }

    #[test]
    fn test_lookup_does_not_create() {
        assert!(Atom::lookup("application/x-btk-never-interned").is_none());
        assert_eq!(Atom::lookup("TARGETS"), Some(TARGETS));
    }

    #[test]
    fn test_atom_bytes() {
        let atoms = [TIMESTAMP, TARGETS, MULTIPLE];
        let bytes = atoms_to_bytes(&atoms);
        assert_eq!(bytes.len(), 12);
        assert_eq!(atoms_from_bytes(&bytes), atoms);
        assert_eq!(atoms_from_bytes(&bytes[..11]).len(), 2);
    }

    #[test]
    fn test_unknown_raw_has_empty_name() {
        assert_eq!(Atom::from_raw(u32::MAX).name(), "");
    }
}
