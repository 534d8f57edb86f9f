//! Device-to-host payload decoding for diagnostics.
//!
//! Only the `bulk-320x320` panel family is supported. The payload carries no header of its
//! own, so the layout is inferred from its length.

use image::{Rgb, RgbImage};

use super::rgb565_to_rgb;
use crate::{PanelError, Result};

/// Layouts a captured payload can be classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Rgb565Be,
    Rgb888,
    Gray8,
}

impl CaptureFormat {
    fn bytes_per_pixel(self) -> usize {
        match self {
            CaptureFormat::Rgb565Be => 2,
            CaptureFormat::Rgb888 => 3,
            CaptureFormat::Gray8 => 1,
        }
    }
}

/// Known (format, width, height) shapes.
pub const CAPTURE_LAYOUTS: &[(CaptureFormat, u32, u32)] = &[
    (CaptureFormat::Rgb565Be, 320, 320),
    (CaptureFormat::Rgb888, 320, 320),
    (CaptureFormat::Gray8, 320, 320),
];

/// A decoded capture.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub format: CaptureFormat,
    pub image: RgbImage,
}

/// Classify a payload by its byte length.
pub fn classify(len: usize) -> Result<(CaptureFormat, u32, u32)> {
    CAPTURE_LAYOUTS
        .iter()
        .copied()
        .find(|&(format, w, h)| format.bytes_per_pixel() * w as usize * h as usize == len)
        .ok_or(PanelError::UnknownPayloadSize { len })
}

/// Decode a captured payload into an RGB raster.
pub fn decode_payload(payload: &[u8]) -> Result<DecodedFrame> {
    let (format, width, height) = classify(payload.len())?;

    let image = match format {
        CaptureFormat::Rgb565Be => {
            let mut image = RgbImage::new(width, height);
            for (pixel, pair) in image.pixels_mut().zip(payload.chunks_exact(2)) {
                *pixel = Rgb(rgb565_to_rgb(u16::from_be_bytes([pair[0], pair[1]])));
            }
            image
        }
        CaptureFormat::Rgb888 => RgbImage::from_raw(width, height, payload.to_vec())
            .ok_or(PanelError::UnknownPayloadSize { len: payload.len() })?,
        CaptureFormat::Gray8 => RgbImage::from_fn(width, height, |x, y| {
            let luma = payload[(y * width + x) as usize];
            Rgb([luma, luma, luma])
        }),
    };

    Ok(DecodedFrame { format, image })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::profile::PixelFormat;

    #[test]
    fn decodes_what_the_bulk_profile_sends() {
        let source = RgbImage::from_pixel(320, 320, Rgb([248, 252, 0]));
        let payload = encode(&source, PixelFormat::Rgb565Be).unwrap();

        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.format, CaptureFormat::Rgb565Be);
        assert_eq!(decoded.image.get_pixel(0, 0), &Rgb([248, 252, 0]));
        assert_eq!(decoded.image.get_pixel(319, 319), &Rgb([248, 252, 0]));
    }

    #[test]
    fn classifies_every_known_length() {
        assert_eq!(classify(204_800).unwrap().0, CaptureFormat::Rgb565Be);
        assert_eq!(classify(307_200).unwrap().0, CaptureFormat::Rgb888);
        assert_eq!(classify(102_400).unwrap().0, CaptureFormat::Gray8);
    }

    #[test]
    fn gray_payload_expands_to_rgb() {
        let payload = vec![77u8; 102_400];
        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.image.get_pixel(5, 9), &Rgb([77, 77, 77]));
    }

    #[test]
    fn unknown_length_is_a_hard_error() {
        let err = decode_payload(&[0u8; 1234]).unwrap_err();
        assert!(matches!(err, PanelError::UnknownPayloadSize { len: 1234 }));
    }
}
