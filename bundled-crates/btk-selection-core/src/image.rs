//! Image marshaling for selection data.
//!
//! This module requires the `image` feature.
//!
//! # Contents
//!
//! - [`Pixbuf`]: 8-bit RGB/RGBA pixel buffer with an explicit row stride
//! - the codec registry consulted by [`crate::TargetList::add_image_targets`]
//! - DIB (CF_DIB, 40-byte header) conversion for the Win32 clipboard
//! - [`NativeImage`]: the bitmap layout handed to native pasteboards

use std::io::Cursor;

use bytes::{BufMut, BytesMut};
use image::{DynamicImage, ImageFormat};

use crate::{SelectionError, SelectionResult};

// =============================================================================
// Codec registry
// =============================================================================

/// An image codec available for selection conversions.
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    /// Short codec name
    pub name: &'static str,
    /// Mime types this codec reads (and writes, when writable)
    pub mime_types: &'static [&'static str],
    /// Encoder/decoder format
    pub format: ImageFormat,
    /// Whether the codec can encode
    pub writable: bool,
}

const CODECS: [ImageCodec; 5] = [
    ImageCodec {
        name: "png",
        mime_types: &["image/png"],
        format: ImageFormat::Png,
        writable: true,
    },
    ImageCodec {
        name: "jpeg",
        mime_types: &["image/jpeg"],
        format: ImageFormat::Jpeg,
        writable: true,
    },
    ImageCodec {
        name: "gif",
        mime_types: &["image/gif"],
        format: ImageFormat::Gif,
        writable: false,
    },
    ImageCodec {
        name: "bmp",
        mime_types: &["image/bmp"],
        format: ImageFormat::Bmp,
        writable: true,
    },
    ImageCodec {
        name: "tiff",
        mime_types: &["image/tiff"],
        format: ImageFormat::Tiff,
        writable: true,
    },
];

/// All registered codecs; png comes first.
pub fn codecs() -> &'static [ImageCodec] {
    &CODECS
}

/// Find the codec handling `mime`.
pub fn codec_for_mime(mime: &str) -> Option<&'static ImageCodec> {
    CODECS.iter().find(|codec| codec.mime_types.contains(&mime))
}

// =============================================================================
// Pixbuf
// =============================================================================

/// 8-bit per channel RGB or RGBA pixels.
///
/// Rows are `rowstride` bytes apart; the stride is at least
/// `width * n_channels` and the padding bytes carry no pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixbuf {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub rowstride: usize,
    /// Whether a fourth (alpha) channel is present
    pub has_alpha: bool,
    /// Pixel rows
    pub pixels: Vec<u8>,
}

impl Pixbuf {
    /// Create a zeroed pixbuf with 4-byte aligned rows.
    pub fn new(has_alpha: bool, width: u32, height: u32) -> Self {
        let channels = if has_alpha { 4 } else { 3 };
        let rowstride = (width as usize * channels).div_ceil(4) * 4;
        Self {
            width,
            height,
            rowstride,
            has_alpha,
            pixels: vec![0; rowstride * height as usize],
        }
    }

    /// Channels per pixel
    pub fn n_channels(&self) -> usize {
        if self.has_alpha {
            4
        } else {
            3
        }
    }

    /// Channel values of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = y as usize * self.rowstride + x as usize * self.n_channels();
        &self.pixels[start..start + self.n_channels()]
    }

    /// Overwrite one pixel; `value` must hold `n_channels()` bytes.
    pub fn put_pixel(&mut self, x: u32, y: u32, value: &[u8]) {
        let channels = self.n_channels();
        let start = y as usize * self.rowstride + x as usize * channels;
        self.pixels[start..start + channels].copy_from_slice(&value[..channels]);
    }

    /// Build from a decoded image, keeping alpha only when the source has it.
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let has_alpha = image.color().has_alpha();
        let mut pixbuf = Self::new(has_alpha, image.width(), image.height());
        let packed = if has_alpha {
            image.to_rgba8().into_raw()
        } else {
            image.to_rgb8().into_raw()
        };
        let row_len = pixbuf.width as usize * pixbuf.n_channels();
        if row_len > 0 {
            for (y, row) in packed.chunks_exact(row_len).enumerate() {
                let start = y * pixbuf.rowstride;
                pixbuf.pixels[start..start + row_len].copy_from_slice(row);
            }
        }
        pixbuf
    }

    /// Convert to a packed image.
    pub fn to_dynamic(&self) -> SelectionResult<DynamicImage> {
        let row_len = self.width as usize * self.n_channels();
        let mut packed = Vec::with_capacity(row_len * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.rowstride;
            let row = self
                .pixels
                .get(start..start + row_len)
                .ok_or_else(|| SelectionError::ImageEncode("pixel buffer shorter than rowstride".to_string()))?;
            packed.extend_from_slice(row);
        }

        let image = if self.has_alpha {
            image::RgbaImage::from_raw(self.width, self.height, packed).map(DynamicImage::ImageRgba8)
        } else {
            image::RgbImage::from_raw(self.width, self.height, packed).map(DynamicImage::ImageRgb8)
        };
        image.ok_or_else(|| SelectionError::ImageEncode("invalid pixbuf dimensions".to_string()))
    }

    /// Encode with the codec registered for `mime`.
    pub fn encode(&self, mime: &str) -> SelectionResult<Vec<u8>> {
        let codec = codec_for_mime(mime)
            .filter(|codec| codec.writable)
            .ok_or_else(|| SelectionError::UnsupportedFormat(mime.to_string()))?;

        let mut image = self.to_dynamic()?;
        if codec.format == ImageFormat::Jpeg && self.has_alpha {
            image = DynamicImage::ImageRgb8(image.to_rgb8());
        }

        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, codec.format)
            .map_err(|e| SelectionError::ImageEncode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Decode any registered format, detected from the data.
    pub fn decode(data: &[u8]) -> SelectionResult<Self> {
        let image = image::load_from_memory(data).map_err(|e| SelectionError::ImageDecode(e.to_string()))?;
        Ok(Self::from_dynamic(&image))
    }
}

// =============================================================================
// DIB
// =============================================================================

const BITMAPINFOHEADER_SIZE: u32 = 40;
const BITMAPFILEHEADER_SIZE: u32 = 14;

/// Write a top-down DIB: 24 bpp without alpha, 32 bpp BGRA with alpha.
///
/// Rows are padded to 4-byte boundaries.
pub fn pixbuf_to_dib(pixbuf: &Pixbuf) -> Vec<u8> {
    let bit_count: u16 = if pixbuf.has_alpha { 32 } else { 24 };
    let row_size = (pixbuf.width as usize * usize::from(bit_count / 8)).div_ceil(4) * 4;
    let image_size = row_size * pixbuf.height as usize;

    let mut dib = BytesMut::with_capacity(BITMAPINFOHEADER_SIZE as usize + image_size);

    // BITMAPINFOHEADER
    dib.put_u32_le(BITMAPINFOHEADER_SIZE);
    dib.put_i32_le(i32::try_from(pixbuf.width).unwrap_or(i32::MAX));
    dib.put_i32_le(-i32::try_from(pixbuf.height).unwrap_or(i32::MAX));
    dib.put_u16_le(1);
    dib.put_u16_le(bit_count);
    dib.put_u32_le(0); // BI_RGB
    dib.put_u32_le(u32::try_from(image_size).unwrap_or(u32::MAX));
    dib.put_i32_le(0);
    dib.put_i32_le(0);
    dib.put_u32_le(0);
    dib.put_u32_le(0);

    let channels = pixbuf.n_channels();
    for y in 0..pixbuf.height {
        let mut written = 0;
        for x in 0..pixbuf.width {
            let px = pixbuf.pixel(x, y);
            dib.put_u8(px[2]);
            dib.put_u8(px[1]);
            dib.put_u8(px[0]);
            if channels == 4 {
                dib.put_u8(px[3]);
            }
            written += channels;
        }
        dib.put_bytes(0, row_size - written);
    }

    dib.to_vec()
}

/// Parse a CF_DIB payload (24 or 32 bpp, either row order).
pub fn dib_to_pixbuf(dib: &[u8]) -> SelectionResult<Pixbuf> {
    if dib.len() < BITMAPINFOHEADER_SIZE as usize {
        return Err(SelectionError::ImageDecode("DIB too small".to_string()));
    }

    let header_size = u32::from_le_bytes([dib[0], dib[1], dib[2], dib[3]]) as usize;
    if header_size < BITMAPINFOHEADER_SIZE as usize || header_size > dib.len() {
        return Err(SelectionError::ImageDecode("invalid DIB header size".to_string()));
    }

    let width = i32::from_le_bytes([dib[4], dib[5], dib[6], dib[7]]).unsigned_abs();
    let height_raw = i32::from_le_bytes([dib[8], dib[9], dib[10], dib[11]]);
    let height = height_raw.unsigned_abs();
    let top_down = height_raw < 0;
    let bit_count = u16::from_le_bytes([dib[14], dib[15]]);

    let has_alpha = match bit_count {
        32 => true,
        24 => false,
        _ => return Err(SelectionError::ImageDecode(format!("unsupported DIB bit depth: {bit_count}"))),
    };

    if width == 0 || height == 0 {
        return Err(SelectionError::ImageDecode("empty DIB".to_string()));
    }

    let bytes_pp = usize::from(bit_count / 8);
    let overflow = || SelectionError::ImageDecode(format!("DIB dimensions {width}x{height} too large"));
    let row_size = (width as usize)
        .checked_mul(bytes_pp)
        .and_then(|bytes| bytes.checked_next_multiple_of(4))
        .ok_or_else(overflow)?;
    let expected = row_size.checked_mul(height as usize).ok_or_else(overflow)?;
    let pixel_data = &dib[header_size..];
    if pixel_data.len() < expected {
        return Err(SelectionError::ImageDecode(format!(
            "insufficient pixel data: {} < {}",
            pixel_data.len(),
            expected
        )));
    }

    let mut pixbuf = Pixbuf::new(has_alpha, width, height);
    for y in 0..height {
        let src_y = if top_down { y } else { height - 1 - y };
        let src_row = src_y as usize * row_size;
        for x in 0..width {
            let p = src_row + x as usize * bytes_pp;
            let alpha = if has_alpha { pixel_data[p + 3] } else { 0xff };
            pixbuf.put_pixel(x, y, &[pixel_data[p + 2], pixel_data[p + 1], pixel_data[p], alpha]);
        }
    }
    Ok(pixbuf)
}

/// Convert a CF_DIB payload to PNG.
pub fn dib_to_png(dib: &[u8]) -> SelectionResult<Vec<u8>> {
    dib_to_pixbuf(dib)?.encode("image/png")
}

/// Prefix a DIB with a BITMAPFILEHEADER, producing a .bmp file.
pub fn dib_to_bmp(dib: &[u8]) -> SelectionResult<Vec<u8>> {
    if dib.len() < BITMAPINFOHEADER_SIZE as usize {
        return Err(SelectionError::ImageDecode("DIB too small".to_string()));
    }
    let header_size = u32::from_le_bytes([dib[0], dib[1], dib[2], dib[3]]);
    let file_size = u32::try_from(dib.len())
        .ok()
        .and_then(|len| len.checked_add(BITMAPFILEHEADER_SIZE))
        .ok_or(SelectionError::DataSizeExceeded {
            actual: dib.len(),
            max: u32::MAX as usize,
        })?;

    let mut bmp = BytesMut::with_capacity(file_size as usize);
    bmp.put_slice(b"BM");
    bmp.put_u32_le(file_size);
    bmp.put_u32_le(0);
    bmp.put_u32_le(BITMAPFILEHEADER_SIZE + header_size);
    bmp.put_slice(dib);
    Ok(bmp.to_vec())
}

/// Strip the BITMAPFILEHEADER of a .bmp file.
pub fn bmp_to_dib(bmp: &[u8]) -> SelectionResult<Vec<u8>> {
    if bmp.len() < (BITMAPFILEHEADER_SIZE + BITMAPINFOHEADER_SIZE) as usize || !bmp.starts_with(b"BM") {
        return Err(SelectionError::ImageDecode("not a BMP file".to_string()));
    }
    Ok(bmp[BITMAPFILEHEADER_SIZE as usize..].to_vec())
}

// =============================================================================
// Native bitmap
// =============================================================================

/// Bitmap layout used by native pasteboards (meshed RGB(A), one plane).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// 24 without alpha, 32 with alpha
    pub bits_per_pixel: u32,
    /// Bytes between row starts
    pub bytes_per_row: usize,
    /// Row data
    pub data: Vec<u8>,
}

impl NativeImage {
    /// Copy a pixbuf, keeping its row stride.
    pub fn from_pixbuf(pixbuf: &Pixbuf) -> Self {
        Self {
            width: pixbuf.width,
            height: pixbuf.height,
            bits_per_pixel: if pixbuf.has_alpha { 32 } else { 24 },
            bytes_per_row: pixbuf.rowstride,
            data: pixbuf.pixels.clone(),
        }
    }

    /// Copy back into a pixbuf.
    pub fn to_pixbuf(&self) -> SelectionResult<Pixbuf> {
        let has_alpha = match self.bits_per_pixel {
            32 => true,
            24 => false,
            other => return Err(SelectionError::ImageDecode(format!("unsupported bits per pixel: {other}"))),
        };
        let channels = if has_alpha { 4 } else { 3 };
        if self.bytes_per_row < self.width as usize * channels
            || self.data.len() < self.bytes_per_row * self.height as usize
        {
            return Err(SelectionError::ImageDecode("bitmap data shorter than its geometry".to_string()));
        }
        Ok(Pixbuf {
            width: self.width,
            height: self.height,
            rowstride: self.bytes_per_row,
            has_alpha,
            pixels: self.data.clone(),
        })
    }
}
