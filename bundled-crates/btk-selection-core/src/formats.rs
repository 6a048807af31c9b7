//! Win32 clipboard format identifiers and byte conversions.
//!
//! Selection targets are mime types or ICCCM atom names; the Win32 clipboard
//! keys data by numeric format. This module holds the standard format ids,
//! the fixed ids this crate registers for well-known mime types, and the
//! converters between the two byte representations.

use crate::atoms::{self, Atom};
use crate::text::{file_uri_to_path, normalize_to_crlf, normalize_to_lf, parse_uri_list, path_to_file_uri};
use crate::{SelectionError, SelectionResult};

// =============================================================================
// Windows Clipboard Format IDs
// =============================================================================

/// Standard Windows clipboard format: ANSI text
pub const CF_TEXT: u32 = 1;

/// Standard Windows clipboard format: Device-independent bitmap
pub const CF_DIB: u32 = 8;

/// Standard Windows clipboard format: Unicode text (UTF-16LE)
pub const CF_UNICODETEXT: u32 = 13;

/// Standard Windows clipboard format: File drop list
pub const CF_HDROP: u32 = 15;

/// Standard Windows clipboard format: DIBV5
pub const CF_DIBV5: u32 = 17;

/// Registered format: HTML ("HTML Format")
pub const CF_HTML: u32 = 0xD010;

/// Registered format: PNG image
pub const CF_PNG: u32 = 0xD011;

/// Registered format: JPEG image
pub const CF_JPEG: u32 = 0xD012;

/// Registered format: GIF image
pub const CF_GIF: u32 = 0xD013;

/// Registered format: Rich Text Format
pub const CF_RTF: u32 = 0xD014;

/// First id handed out by `RegisterClipboardFormat`
pub const CF_REGISTERED_BASE: u32 = 0xC000;

// =============================================================================
// Clipboard Format
// =============================================================================

/// A Win32 clipboard format with its registered name, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClipboardFormat {
    /// Format id
    pub id: u32,
    /// Registered name; `None` for predefined formats
    pub name: Option<String>,
}

impl ClipboardFormat {
    /// Predefined format
    pub fn new(id: u32) -> Self {
        Self { id, name: None }
    }

    /// Registered format
    pub fn with_name(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
        }
    }

    /// True for ids in the registered range
    pub fn is_registered(&self) -> bool {
        self.id >= CF_REGISTERED_BASE
    }
}

/// Fixed format for a well-known target, `None` if it needs a registered id.
pub fn target_to_clipboard_format(target: Atom) -> Option<ClipboardFormat> {
    let format = match target {
        t if t == atoms::UTF8_STRING
            || t == atoms::STRING
            || t == atoms::TEXT
            || t == atoms::COMPOUND_TEXT
            || t == atoms::TEXT_PLAIN
            || t == atoms::TEXT_PLAIN_UTF8 =>
        {
            ClipboardFormat::new(CF_UNICODETEXT)
        }
        t if t == atoms::TEXT_URI_LIST => ClipboardFormat::new(CF_HDROP),
        t if t == atoms::TEXT_HTML => ClipboardFormat::with_name(CF_HTML, "HTML Format"),
        t if t == atoms::TEXT_RTF => ClipboardFormat::with_name(CF_RTF, "Rich Text Format"),
        t if t == atoms::IMAGE_PNG => ClipboardFormat::with_name(CF_PNG, "PNG"),
        t if t == atoms::IMAGE_JPEG => ClipboardFormat::with_name(CF_JPEG, "JFIF"),
        t if t == atoms::IMAGE_GIF => ClipboardFormat::with_name(CF_GIF, "GIF"),
        t if t == atoms::IMAGE_BMP => ClipboardFormat::new(CF_DIB),
        _ => return None,
    };
    Some(format)
}

/// Canonical target for a fixed format id.
pub fn clipboard_format_to_target(format_id: u32) -> Option<Atom> {
    match format_id {
        CF_UNICODETEXT | CF_TEXT => Some(atoms::UTF8_STRING),
        CF_HDROP => Some(atoms::TEXT_URI_LIST),
        CF_HTML => Some(atoms::TEXT_HTML),
        CF_RTF => Some(atoms::TEXT_RTF),
        CF_PNG => Some(atoms::IMAGE_PNG),
        CF_JPEG => Some(atoms::IMAGE_JPEG),
        CF_GIF => Some(atoms::IMAGE_GIF),
        CF_DIB | CF_DIBV5 => Some(atoms::IMAGE_BMP),
        _ => None,
    }
}

// =============================================================================
// Format Converter
// =============================================================================

/// Converts payloads between selection and Win32 representations.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    /// Maximum payload size accepted (default: 16MB)
    pub max_size: usize,
}

impl Default for FormatConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatConverter {
    /// Create a converter with default limits
    pub fn new() -> Self {
        Self {
            max_size: 16 * 1024 * 1024,
        }
    }

    /// Create a converter with a custom size limit
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Reject payloads larger than `max_size`.
    pub fn check_size(&self, len: usize) -> SelectionResult<()> {
        if len > self.max_size {
            return Err(SelectionError::DataSizeExceeded {
                actual: len,
                max: self.max_size,
            });
        }
        Ok(())
    }

    /// UTF-8 text to NUL-terminated UTF-16LE with CRLF line endings.
    pub fn text_to_unicode(&self, text: &str) -> SelectionResult<Vec<u8>> {
        self.check_size(text.len())?;

        let mut result: Vec<u8> = normalize_to_crlf(text)
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        result.extend_from_slice(&[0, 0]);
        Ok(result)
    }

    /// UTF-16LE (optionally NUL-terminated) to UTF-8 with LF line endings.
    pub fn unicode_to_text(&self, data: &[u8]) -> SelectionResult<String> {
        self.check_size(data.len())?;

        if data.len() % 2 != 0 {
            return Err(SelectionError::InvalidUtf16);
        }

        let utf16: Vec<u16> = data
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        let end = utf16.iter().position(|&c| c == 0).unwrap_or(utf16.len());

        String::from_utf16(&utf16[..end])
            .map(|text| normalize_to_lf(&text))
            .map_err(|_| SelectionError::InvalidUtf16)
    }

    /// Wrap an HTML fragment in the CF_HTML envelope.
    pub fn html_to_cf_html(&self, html: &str) -> SelectionResult<Vec<u8>> {
        self.check_size(html.len())?;

        const HEADER_LEN: usize = "Version:0.9\r\n\
                                   StartHTML:00000000\r\n\
                                   EndHTML:00000000\r\n\
                                   StartFragment:00000000\r\n\
                                   EndFragment:00000000\r\n"
            .len();
        let prefix = "<html><body><!--StartFragment-->";
        let suffix = "<!--EndFragment--></body></html>";

        let start_fragment = HEADER_LEN + prefix.len();
        let end_fragment = start_fragment + html.len();
        let end_html = end_fragment + suffix.len();

        let mut result = format!(
            "Version:0.9\r\n\
             StartHTML:{HEADER_LEN:08}\r\n\
             EndHTML:{end_html:08}\r\n\
             StartFragment:{start_fragment:08}\r\n\
             EndFragment:{end_fragment:08}\r\n"
        );
        result.push_str(prefix);
        result.push_str(html);
        result.push_str(suffix);

        Ok(result.into_bytes())
    }

    /// Extract the fragment of a CF_HTML payload.
    pub fn cf_html_to_html(&self, data: &[u8]) -> SelectionResult<String> {
        let text = std::str::from_utf8(data).map_err(|_| SelectionError::InvalidUtf8)?;

        let start = Self::parse_header_value(text, "StartFragment:")?;
        let end = Self::parse_header_value(text, "EndFragment:")?;

        text.get(start..end)
            .filter(|_| start < end)
            .map(str::to_string)
            .ok_or_else(|| SelectionError::FormatConversion("invalid CF_HTML offsets".to_string()))
    }

    fn parse_header_value(text: &str, key: &str) -> SelectionResult<usize> {
        text.lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| SelectionError::FormatConversion(format!("missing {key} header")))
    }

    /// Convert a `text/uri-list` payload into a wide-character DROPFILES block.
    ///
    /// Only `file://` URIs survive; other schemes have no HDROP form.
    pub fn uri_list_to_hdrop(&self, uri_list: &str) -> SelectionResult<Vec<u8>> {
        self.check_size(uri_list.len())?;

        let paths: Vec<String> = parse_uri_list(uri_list)
            .iter()
            .filter_map(|uri| file_uri_to_path(uri))
            .collect();
        if paths.is_empty() {
            return Err(SelectionError::FormatConversion("no valid file URIs".to_string()));
        }

        // DROPFILES: pFiles, pt.x, pt.y, fNC, fWide
        let mut result = Vec::new();
        result.extend_from_slice(&20u32.to_le_bytes());
        result.extend_from_slice(&0i32.to_le_bytes());
        result.extend_from_slice(&0i32.to_le_bytes());
        result.extend_from_slice(&0u32.to_le_bytes());
        result.extend_from_slice(&1u32.to_le_bytes());

        for path in paths {
            for c in path.encode_utf16() {
                result.extend_from_slice(&c.to_le_bytes());
            }
            result.extend_from_slice(&[0, 0]);
        }
        result.extend_from_slice(&[0, 0]);

        Ok(result)
    }

    /// Convert a DROPFILES block into `file://` URIs.
    pub fn hdrop_to_uris(&self, data: &[u8]) -> SelectionResult<Vec<String>> {
        if data.len() < 20 {
            return Err(SelectionError::FormatConversion("HDROP too small".to_string()));
        }

        let p_files = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let f_wide = u32::from_le_bytes([data[16], data[17], data[18], data[19]]) != 0;
        if p_files >= data.len() {
            return Err(SelectionError::FormatConversion("invalid pFiles offset".to_string()));
        }

        let file_data = &data[p_files..];
        let mut uris = Vec::new();

        if f_wide {
            let units: Vec<u16> = file_data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            for path in units.split(|&c| c == 0).take_while(|p| !p.is_empty()) {
                let path = String::from_utf16(path).map_err(|_| SelectionError::InvalidUtf16)?;
                uris.push(path_to_file_uri(&path));
            }
        } else {
            for path in file_data.split(|&b| b == 0).take_while(|p| !p.is_empty()) {
                let path = std::str::from_utf8(path).map_err(|_| SelectionError::InvalidUtf8)?;
                uris.push(path_to_file_uri(path));
            }
        }

        Ok(uris)
    }
}
