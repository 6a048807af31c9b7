//! The value exchanged by every conversion and retrieval.
//!
//! A [`SelectionData`] names the selection, the requested target, the type
//! the data actually has and the item width (8, 16 or 32 bits). The payload
//! is always followed by one NUL byte so text can be read in place. A
//! negative length means "no data": the owner rejected the target or the
//! retrieval failed.

use crate::atoms::{self, atoms_from_bytes, Atom};
use crate::targets::TargetList;
use crate::text::{
    compound_text_to_utf8, format_uri_list, latin1_to_utf8, normalize_to_crlf, normalize_to_lf, parse_uri_list,
    utf8_to_compound_text, utf8_to_latin1,
};

#[cfg(feature = "image")]
use crate::image::{codec_for_mime, Pixbuf};

/// Identifies the display a selection lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DisplayId(pub u32);

/// Bytes per transport item for a format width.
///
/// # Panics
///
/// Panics unless `format` is 8, 16 or 32; any other width is a bug in the
/// code that produced the data.
pub fn bytes_per_item(format: i32) -> usize {
    match format {
        8 => 1,
        16 => 2,
        32 => 4,
        other => panic!("selection format width must be 8, 16 or 32, got {other}"),
    }
}

/// Typed payload of a selection conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionData {
    selection: Atom,
    target: Atom,
    data_type: Atom,
    format: i32,
    data: Vec<u8>,
    length: i32,
    display: DisplayId,
}

impl SelectionData {
    /// Empty (rejected) data for a request on the default display.
    pub fn new(selection: Atom, target: Atom) -> Self {
        Self::for_display(DisplayId::default(), selection, target)
    }

    /// Empty (rejected) data for a request on `display`.
    pub fn for_display(display: DisplayId, selection: Atom, target: Atom) -> Self {
        Self {
            selection,
            target,
            data_type: atoms::NONE,
            format: 0,
            data: Vec::new(),
            length: -1,
            display,
        }
    }

    /// Store `data` with its type and item width.
    pub fn set(&mut self, data_type: Atom, format: i32, data: &[u8]) {
        let mut buffer = Vec::with_capacity(data.len() + 1);
        buffer.extend_from_slice(data);
        buffer.push(0);

        self.data_type = data_type;
        self.format = format;
        self.data = buffer;
        self.length = i32::try_from(data.len()).unwrap_or(i32::MAX);
    }

    /// Mark the data as rejected, dropping any payload.
    pub fn reject(&mut self) {
        self.data.clear();
        self.length = -1;
    }

    /// Selection the data belongs to
    pub fn selection(&self) -> Atom {
        self.selection
    }

    /// Target that was requested
    pub fn target(&self) -> Atom {
        self.target
    }

    /// Type the data was delivered as
    pub fn data_type(&self) -> Atom {
        self.data_type
    }

    /// Item width in bits
    pub fn format(&self) -> i32 {
        self.format
    }

    /// Payload length in bytes; negative when there is no data
    pub fn length(&self) -> i32 {
        self.length
    }

    /// Display the data came from
    pub fn display(&self) -> DisplayId {
        self.display
    }

    /// True when the owner rejected the target or the transfer failed
    pub fn is_rejected(&self) -> bool {
        self.length < 0
    }

    /// Payload without the trailing NUL; empty when rejected.
    pub fn data(&self) -> &[u8] {
        match usize::try_from(self.length) {
            Ok(len) => &self.data[..len],
            Err(_) => &[],
        }
    }

    /// Payload followed by its NUL terminator; empty when rejected.
    pub fn data_with_nul(&self) -> &[u8] {
        &self.data
    }

    /// Number of transport items in the payload.
    pub fn item_count(&self) -> usize {
        self.data().len() / bytes_per_item(self.format)
    }

    // =========================================================================
    // Text
    // =========================================================================

    /// Store `text` in the representation the target asks for.
    ///
    /// Returns false when the target is not a text target or the text can't
    /// be represented in it.
    pub fn set_text(&mut self, text: &str) -> bool {
        let target = self.target;
        if target == atoms::UTF8_STRING {
            self.set(atoms::UTF8_STRING, 8, text.as_bytes());
            true
        } else if target == atoms::STRING {
            match utf8_to_latin1(text) {
                Some(latin1) => {
                    self.set(atoms::STRING, 8, &latin1);
                    true
                }
                None => false,
            }
        } else if target == atoms::TEXT {
            match utf8_to_latin1(text) {
                Some(latin1) => self.set(atoms::STRING, 8, &latin1),
                None => self.set(atoms::COMPOUND_TEXT, 8, &utf8_to_compound_text(text)),
            }
            true
        } else if target == atoms::COMPOUND_TEXT {
            self.set(atoms::COMPOUND_TEXT, 8, &utf8_to_compound_text(text));
            true
        } else if target == atoms::TEXT_PLAIN {
            if !text.is_ascii() {
                return false;
            }
            self.set(target, 8, normalize_to_crlf(text).as_bytes());
            true
        } else if target == atoms::TEXT_PLAIN_UTF8 {
            self.set(target, 8, normalize_to_crlf(text).as_bytes());
            true
        } else {
            false
        }
    }

    /// Decode text data as UTF-8, if the type is a text type.
    pub fn text(&self) -> Option<String> {
        if self.is_rejected() {
            return None;
        }
        let data = self.data();
        let ty = self.data_type;

        if ty == atoms::STRING {
            Some(latin1_to_utf8(data))
        } else if ty == atoms::UTF8_STRING {
            std::str::from_utf8(data).ok().map(str::to_string)
        } else if ty == atoms::COMPOUND_TEXT || ty == atoms::TEXT {
            compound_text_to_utf8(data).ok()
        } else if ty == atoms::TEXT_PLAIN || ty == atoms::TEXT_PLAIN_UTF8 {
            std::str::from_utf8(data).ok().map(normalize_to_lf)
        } else {
            None
        }
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Encode `pixbuf` with the codec matching the target.
    #[cfg(feature = "image")]
    pub fn set_pixbuf(&mut self, pixbuf: &Pixbuf) -> bool {
        let mime = self.target.name();
        if !codec_for_mime(mime).is_some_and(|codec| codec.writable) {
            return false;
        }
        match pixbuf.encode(mime) {
            Ok(encoded) => {
                self.set(self.target, 8, &encoded);
                true
            }
            Err(e) => {
                tracing::warn!(target = mime, error = %e, "pixbuf encoding failed");
                false
            }
        }
    }

    /// Decode image data in any registered format.
    #[cfg(feature = "image")]
    pub fn pixbuf(&self) -> Option<Pixbuf> {
        if self.length <= 0 {
            return None;
        }
        Pixbuf::decode(self.data()).ok()
    }

    // =========================================================================
    // URIs
    // =========================================================================

    /// Store a `text/uri-list`; false for other targets or non-ASCII URIs.
    pub fn set_uris<S: AsRef<str>>(&mut self, uris: &[S]) -> bool {
        if self.target != atoms::TEXT_URI_LIST {
            return false;
        }
        match format_uri_list(uris) {
            Some(list) => {
                self.set(atoms::TEXT_URI_LIST, 8, &list);
                true
            }
            None => false,
        }
    }

    /// Parse `text/uri-list` data.
    pub fn uris(&self) -> Option<Vec<String>> {
        if self.is_rejected() || self.data_type != atoms::TEXT_URI_LIST {
            return None;
        }
        std::str::from_utf8(self.data()).ok().map(parse_uri_list)
    }

    // =========================================================================
    // Targets
    // =========================================================================

    /// Atoms of a TARGETS reply; requires type ATOM at format 32.
    pub fn targets(&self) -> Option<Vec<Atom>> {
        if self.is_rejected() || self.data_type != atoms::ATOM || self.format != 32 {
            return None;
        }
        Some(atoms_from_bytes(self.data()))
    }

    /// True if this TARGETS reply offers a text target.
    pub fn targets_include_text(&self) -> bool {
        self.targets().is_some_and(|targets| targets_include_text(&targets))
    }

    /// True if this TARGETS reply offers one of `formats`.
    pub fn targets_include_rich_text(&self, formats: &[Atom]) -> bool {
        self.targets()
            .is_some_and(|targets| targets_include_rich_text(&targets, formats))
    }

    /// True if this TARGETS reply offers a decodable (or encodable) image.
    pub fn targets_include_image(&self, writable: bool) -> bool {
        self.targets()
            .is_some_and(|targets| targets_include_image(&targets, writable))
    }

    /// True if this TARGETS reply offers a URI list.
    pub fn targets_include_uri(&self) -> bool {
        self.targets().is_some_and(|targets| targets_include_uri(&targets))
    }
}

/// True if `targets` contains a text target.
pub fn targets_include_text(targets: &[Atom]) -> bool {
    targets.iter().any(|&t| {
        t == atoms::UTF8_STRING
            || t == atoms::STRING
            || t == atoms::TEXT
            || t == atoms::COMPOUND_TEXT
            || t == atoms::TEXT_PLAIN
            || t == atoms::TEXT_PLAIN_UTF8
    })
}

/// True if `targets` contains one of the rich text `formats`.
pub fn targets_include_rich_text(targets: &[Atom], formats: &[Atom]) -> bool {
    targets.iter().any(|t| formats.contains(t))
}

/// True if `targets` contains an image type with a registered codec.
pub fn targets_include_image(targets: &[Atom], writable: bool) -> bool {
    let list = TargetList::default();
    list.add_image_targets(0, writable);
    targets.iter().any(|&t| list.find(t).is_some())
}

/// True if `targets` contains `text/uri-list`.
pub fn targets_include_uri(targets: &[Atom]) -> bool {
    targets.contains(&atoms::TEXT_URI_LIST)
}
