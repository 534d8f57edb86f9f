//! Pixel encoding from composited rasters to device wire formats.
//!
//! Encoding is a pure function of the raster and the profile's [`PixelFormat`]. The
//! RGB565 packing keeps the top 5/6/5 bits of each channel:
//!
//! ```rust
//! use panelcast::encode::rgb565;
//!
//! assert_eq!(rgb565([255, 0, 0]), 0xF800);
//! assert_eq!(rgb565([0, 255, 0]), 0x07E0);
//! assert_eq!(rgb565([0, 0, 255]), 0x001F);
//! ```

pub mod decode;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::trace;

use crate::profile::PixelFormat;
use crate::{PanelError, Result};

/// Pack an 8-bit RGB triple into RGB565.
#[inline]
pub fn rgb565([r, g, b]: [u8; 3]) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Expand an RGB565 value back to 8-bit channels (low bits zero).
#[inline]
pub fn rgb565_to_rgb(value: u16) -> [u8; 3] {
    let r = ((value >> 11) & 0x1F) as u8;
    let g = ((value >> 5) & 0x3F) as u8;
    let b = (value & 0x1F) as u8;
    [r << 3, g << 2, b << 3]
}

/// Encode a raster in the given wire format.
pub fn encode(raster: &RgbImage, format: PixelFormat) -> Result<Vec<u8>> {
    let bytes = match format {
        PixelFormat::Rgb565Le => encode_rgb565(raster, u16::to_le_bytes),
        PixelFormat::Rgb565Be => encode_rgb565(raster, u16::to_be_bytes),
        PixelFormat::Rgb565LeColumnScan => encode_column_scan(raster),
        PixelFormat::Gray8 => image::imageops::grayscale(raster).into_raw(),
        PixelFormat::Jpeg { quality } => encode_jpeg(raster, quality)?,
    };
    trace!(?format, len = bytes.len(), "Encoded frame");
    Ok(bytes)
}

fn encode_rgb565(raster: &RgbImage, order: fn(u16) -> [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raster.as_raw().len() / 3 * 2);
    for pixel in raster.pixels() {
        out.extend_from_slice(&order(rgb565(pixel.0)));
    }
    out
}

/// Column-major, bottom-to-top scan. Every `height`-th sample is a zero separator,
/// which lands on the top row of each column.
fn encode_column_scan(raster: &RgbImage) -> Vec<u8> {
    let (width, height) = raster.dimensions();
    let mut out = Vec::with_capacity(width as usize * height as usize * 2);
    let mut sample = 0usize;

    for x in 0..width {
        for y in (0..height).rev() {
            sample += 1;
            if sample % height as usize == 0 {
                out.extend_from_slice(&[0x00, 0x00]);
            } else {
                out.extend_from_slice(&rgb565(raster.get_pixel(x, y).0).to_le_bytes());
            }
        }
    }
    out
}

fn encode_jpeg(raster: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(raster)
        .map_err(|e| PanelError::image("JPEG encode", e))?;
    Ok(out)
}
