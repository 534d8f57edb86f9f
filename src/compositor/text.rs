//! Text rasterisation for overlays.

use std::fs;
use std::path::{Path, PathBuf};

use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::config::{Color, Position, TextStyle};
use crate::{PanelError, Result};

/// Fonts tried, in order, when the configuration names none.
pub const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Draws a single line of text onto a canvas.
pub trait GlyphRenderer: Send {
    /// Draw `text` with its top-left corner at `position`.
    fn draw_text(&self, canvas: &mut RgbaImage, text: &str, position: Position, style: &TextStyle);
}

/// [`GlyphRenderer`] backed by a TrueType/OpenType font.
pub struct FontdueRenderer {
    font: Font,
    path: PathBuf,
}

impl FontdueRenderer {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PanelError::file_error(path, e))?;
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| PanelError::unsupported_media(path, e))?;
        debug!(path = %path.display(), "Font loaded");
        Ok(Self { font, path: path.to_path_buf() })
    }

    /// Load the configured font, or the first installed fallback font.
    pub fn load_or_fallback(configured: Option<&Path>) -> Result<Self> {
        if let Some(path) = configured {
            return Self::load(path);
        }
        FALLBACK_FONTS
            .iter()
            .map(Path::new)
            .find(|path| path.is_file())
            .ok_or_else(|| PanelError::unsupported_media("", "no font configured and no fallback font installed"))
            .and_then(Self::load)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GlyphRenderer for FontdueRenderer {
    fn draw_text(&self, canvas: &mut RgbaImage, text: &str, position: Position, style: &TextStyle) {
        let size = style.font_size;
        let ascent = self
            .font
            .horizontal_line_metrics(size)
            .map_or(size, |metrics| metrics.ascent);
        let baseline = position.y as f32 + ascent;
        let mut cursor_x = position.x as f32;

        for c in text.chars().filter(|c| !c.is_control()) {
            let (metrics, coverage) = self.font.rasterize(c, size);
            let glyph_x = cursor_x.round() as i64 + metrics.xmin as i64;
            let glyph_y = baseline.round() as i64 - metrics.height as i64 - metrics.ymin as i64;

            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let alpha = coverage[row * metrics.width + col];
                    if alpha > 0 {
                        blend(canvas, glyph_x + col as i64, glyph_y + row as i64, style.color, alpha);
                    }
                }
            }
            cursor_x += metrics.advance_width;
        }
    }
}

/// Source-over blend of `color` scaled by `coverage` into one pixel. Out-of-bounds is clipped.
pub(crate) fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: Color, coverage: u8) {
    let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
        return;
    };
    if x >= canvas.width() || y >= canvas.height() {
        return;
    }

    let [r, g, b, a] = color.0;
    let alpha = u32::from(coverage) * u32::from(a) / 255;
    let pixel = canvas.get_pixel_mut(x, y);
    let Rgba([dr, dg, db, da]) = *pixel;
    let mix = |src: u8, dst: u8| ((u32::from(src) * alpha + u32::from(dst) * (255 - alpha)) / 255) as u8;
    *pixel = Rgba([mix(r, dr), mix(g, dg), mix(b, db), da.max(alpha as u8)]);
}
