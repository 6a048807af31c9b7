//! Error types for marshaling selection data and talking to a transport.

use thiserror::Error;

/// Result type for selection operations
pub type SelectionResult<T> = std::result::Result<T, SelectionError>;

/// Errors raised while encoding, decoding or writing selection data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Payload does not match the layout its target promises
    #[error("format conversion failed: {0}")]
    FormatConversion(String),

    /// Target or encoding this crate cannot produce or read
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Text target holding bytes that are not UTF-8
    #[error("invalid UTF-8 data")]
    InvalidUtf8,

    /// Native text holding unpaired surrogates or an odd byte count
    #[error("invalid UTF-16 data")]
    InvalidUtf16,

    /// Image bytes the decoder rejected
    #[error("image decode error: {0}")]
    ImageDecode(String),

    /// Pixbuf the encoder could not serialize
    #[error("image encode error: {0}")]
    ImageEncode(String),

    /// A single write exceeded the transport's atomic request size
    #[error("data size {actual} exceeds maximum {max}")]
    DataSizeExceeded {
        /// Actual size in bytes
        actual: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// Operation not valid for the object's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The window named in a request does not exist (anymore)
    #[error("bad window: {0}")]
    BadWindow(u32),
}
