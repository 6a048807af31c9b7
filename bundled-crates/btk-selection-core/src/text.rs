//! Text encodings used on the selection wire.
//!
//! - STRING is Latin-1.
//! - COMPOUND_TEXT is ISO 2022; Latin-1 runs are written directly and other
//!   characters go into UTF-8 extended segments (`ESC % G` .. `ESC % @`).
//! - `text/plain` travels with CRLF line endings and is handed to callers with LF.
//! - `text/uri-list` is one URI per line, CRLF terminated.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::{SelectionError, SelectionResult};

/// Characters escaped in the path component of a `file://` URI.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

const ESC: u8 = 0x1b;

// =============================================================================
// Latin-1
// =============================================================================

/// Encode UTF-8 text as Latin-1; `None` if any character is outside U+0000..=U+00FF.
pub fn utf8_to_latin1(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

/// Decode Latin-1 bytes; every byte maps to the code point of the same value.
pub fn latin1_to_utf8(data: &[u8]) -> String {
    data.iter().map(|&b| char::from(b)).collect()
}

// =============================================================================
// COMPOUND_TEXT
// =============================================================================

/// Encode text as COMPOUND_TEXT.
pub fn utf8_to_compound_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut extended = String::new();

    let flush = |out: &mut Vec<u8>, extended: &mut String| {
        if !extended.is_empty() {
            out.extend_from_slice(&[ESC, b'%', b'G']);
            out.extend_from_slice(extended.as_bytes());
            out.extend_from_slice(&[ESC, b'%', b'@']);
            extended.clear();
        }
    };

    for c in text.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(byte) => {
                flush(&mut out, &mut extended);
                out.push(byte);
            }
            Err(_) => extended.push(c),
        }
    }
    flush(&mut out, &mut extended);
    out
}

/// Decode COMPOUND_TEXT containing ASCII/Latin-1 designations and UTF-8 segments.
pub fn compound_text_to_utf8(data: &[u8]) -> SelectionResult<String> {
    let mut out = String::with_capacity(data.len());
    let mut pos = 0;

    while pos < data.len() {
        if data[pos] != ESC {
            out.push(char::from(data[pos]));
            pos += 1;
            continue;
        }

        let sequence = data.get(pos + 1..pos + 3).ok_or_else(|| {
            SelectionError::FormatConversion("truncated COMPOUND_TEXT escape".to_string())
        })?;

        match sequence {
            // UTF-8 extended segment, runs until ESC % @
            [b'%', b'G'] => {
                let start = pos + 3;
                let end = data[start..]
                    .windows(3)
                    .position(|w| w == [ESC, b'%', b'@'])
                    .map(|offset| start + offset)
                    .unwrap_or(data.len());
                let segment = std::str::from_utf8(&data[start..end]).map_err(|_| SelectionError::InvalidUtf8)?;
                out.push_str(segment);
                pos = (end + 3).min(data.len());
            }
            // ASCII into GL, Latin-1 right half into GR
            [b'(', b'B'] | [b'-', b'A'] => pos += 3,
            _ => {
                return Err(SelectionError::UnsupportedFormat(format!(
                    "COMPOUND_TEXT designation {:?}",
                    String::from_utf8_lossy(sequence)
                )))
            }
        }
    }

    Ok(out)
}

// =============================================================================
// Line endings
// =============================================================================

/// Turn lone `\n` and lone `\r` into `\r\n`.
pub fn normalize_to_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                out.push_str("\r\n");
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' => out.push_str("\r\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Turn `\r\n` and lone `\r` into `\n`.
pub fn normalize_to_lf(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\r' {
            out.push('\n');
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// URI lists
// =============================================================================

/// Serialize URIs as a `text/uri-list` payload: each URI followed by CRLF.
///
/// Returns `None` when a URI is not plain ASCII.
pub fn format_uri_list<S: AsRef<str>>(uris: &[S]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for uri in uris {
        let uri = uri.as_ref();
        if !uri.is_ascii() {
            return None;
        }
        out.extend_from_slice(uri.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    Some(out)
}

/// Extract the URIs of a `text/uri-list` payload, skipping comments and blank lines.
pub fn parse_uri_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Build a `file://` URI for an absolute path.
pub fn path_to_file_uri(path: &str) -> String {
    format!("file://{}", utf8_percent_encode(path, PATH_ESCAPE))
}

/// Recover the path of a `file://` URI.
pub fn file_uri_to_path(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("file://")?;
    // file://host/path keeps only the path
    let path = if rest.starts_with('/') {
        rest
    } else {
        &rest[rest.find('/')?..]
    };
    percent_decode_str(path).decode_utf8().ok().map(|p| p.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_latin1_roundtrip() {
        let bytes = utf8_to_latin1("caf\u{e9}").unwrap();
        assert_eq!(bytes, b"caf\xe9");
        assert_eq!(latin1_to_utf8(&bytes), "caf\u{e9}");
        assert!(utf8_to_latin1("snow \u{2603}").is_none());
    }

    #[test]
    fn test_compound_text_latin1_is_plain() {
        assert_eq!(utf8_to_compound_text("gr\u{fc}n"), b"gr\xfcn");
    }

    #[test]
    fn test_compound_text_extended_segment() {
        let encoded = utf8_to_compound_text("a\u{263a}b");
        assert_eq!(&encoded[..4], b"a\x1b%G");
        assert_eq!(compound_text_to_utf8(&encoded).unwrap(), "a\u{263a}b");
    }

    #[test]
    fn test_compound_text_designations() {
        let data = b"\x1b(Bhi\x1b-A\xe9";
        assert_eq!(compound_text_to_utf8(data).unwrap(), "hi\u{e9}");
        assert!(compound_text_to_utf8(b"\x1b$(B").is_err());
        assert!(compound_text_to_utf8(b"x\x1b").is_err());
    }

    #[test]
    fn test_normalize_to_crlf() {
        assert_eq!(normalize_to_crlf("a\nb\rc\r\nd"), "a\r\nb\r\nc\r\nd");
        assert_eq!(normalize_to_crlf("end\r"), "end\r\n");
    }

    #[test]
    fn test_normalize_to_lf() {
        assert_eq!(normalize_to_lf("a\r\nb\rc\nd"), "a\nb\nc\nd");
    }

    #[test]
    fn test_uri_list_roundtrip() {
        let bytes = format_uri_list(&["file:///tmp/a%20b", "http://example.com/"]).unwrap();
        assert_eq!(bytes, b"file:///tmp/a%20b\r\nhttp://example.com/\r\n");

        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(parse_uri_list(&text), vec!["file:///tmp/a%20b", "http://example.com/"]);
        assert!(format_uri_list(&["file:///tmp/\u{e9}"]).is_none());
    }

    #[test]
    fn test_parse_uri_list_skips_comments() {
        let uris = parse_uri_list("# comment\r\n\r\nfile:///x\r\n  file:///y  \r\n");
        assert_eq!(uris, vec!["file:///x", "file:///y"]);
    }

    #[test]
    fn test_file_uri_roundtrip() {
        let uri = path_to_file_uri("/home/user/my file#1.txt");
        assert_eq!(uri, "file:///home/user/my%20file%231.txt");
        assert_eq!(file_uri_to_path(&uri).unwrap(), "/home/user/my file#1.txt");
        assert_eq!(file_uri_to_path("file://host/etc/hosts").unwrap(), "/etc/hosts");
        assert!(file_uri_to_path("http://example.com").is_none());
    }

    proptest! {
        #[test]
        fn test_crlf_then_lf_is_lf_normal_form(text in "[a-z\r\n]{0,64}") {
            let lf = normalize_to_lf(&text);
            prop_assert_eq!(normalize_to_lf(&normalize_to_crlf(&lf)), lf.clone());
            prop_assert!(!lf.contains('\r'));
        }

        #[test]
        fn test_compound_text_roundtrip(text in "\\PC{0,32}") {
            let encoded = utf8_to_compound_text(&text);
            prop_assert_eq!(compound_text_to_utf8(&encoded).unwrap(), text);
        }
    }
}
