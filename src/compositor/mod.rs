//! Frame composition: background, foreground overlay and text layers.
//!
//! Layers are applied in a fixed order:
//!
//! 1. the background raster from the frame source
//! 2. the optional foreground image, alpha-scaled and pasted at its position
//! 3. metric overlays in configuration order
//! 4. the date (`dd/mm`), then the time (`HH:MM`)
//!
//! Later layers paint over earlier ones. The result is an opaque RGB raster.

pub mod text;

use chrono::NaiveDateTime;
use image::{DynamicImage, RgbImage, RgbaImage, imageops};
use tracing::{debug, warn};

use crate::config::{DisplayConfig, Position, TextStyle};
use crate::metrics::MetricsSnapshot;

pub use text::{FontdueRenderer, GlyphRenderer};

/// Placeholder drawn for metrics missing from the snapshot.
pub const MISSING_VALUE: &str = "N/A";

/// One line of text to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayer {
    pub text: String,
    pub position: Position,
    pub style: TextStyle,
}

/// Text layers for a frame, in drawing order.
pub fn text_layers(display: &DisplayConfig, snapshot: &MetricsSnapshot, now: NaiveDateTime) -> Vec<TextLayer> {
    let metrics = display.metrics.iter().map(|overlay| {
        let value = snapshot
            .get(overlay.key)
            .map(|value| value.format(overlay.style.decimals))
            .unwrap_or_else(|| MISSING_VALUE.to_string());
        TextLayer {
            text: format!("{}{}{}", overlay.label, value, overlay.unit),
            position: overlay.position,
            style: overlay.style.clone(),
        }
    });

    let clock = [(&display.date, "%d/%m"), (&display.time, "%H:%M")]
        .into_iter()
        .filter_map(|(overlay, pattern)| {
            overlay.as_ref().map(|overlay| TextLayer {
                text: now.format(pattern).to_string(),
                position: overlay.position,
                style: overlay.style.clone(),
            })
        });

    metrics.chain(clock).collect()
}

/// Foreground image with its alpha already scaled.
#[derive(Debug, Clone)]
struct Foreground {
    image: RgbaImage,
    position: Position,
}

impl Foreground {
    fn load(display: &DisplayConfig) -> Option<Self> {
        let config = display.foreground.as_ref()?;
        let mut image = match image::open(&config.path) {
            Ok(image) => image.into_rgba8(),
            Err(e) => {
                warn!(path = %config.path.display(), error = %e, "Cannot load foreground image, skipping");
                return None;
            }
        };
        if config.alpha < 1.0 {
            for pixel in image.pixels_mut() {
                pixel[3] = (f32::from(pixel[3]) * config.alpha) as u8;
            }
        }
        debug!(path = %config.path.display(), alpha = config.alpha, "Foreground loaded");
        Some(Self { image, position: config.position })
    }
}

/// Merges the layers of a frame.
pub struct Compositor {
    foreground: Option<Foreground>,
    renderer: Option<Box<dyn GlyphRenderer>>,
}

impl Compositor {
    /// Build for `display`, loading its foreground and font.
    ///
    /// Neither is fatal: a missing foreground is skipped and without a font text layers
    /// are not drawn.
    pub fn new(display: &DisplayConfig) -> Self {
        let needs_text = !display.metrics.is_empty() || display.date.is_some() || display.time.is_some();
        let renderer = if needs_text {
            match FontdueRenderer::load_or_fallback(display.font_path.as_deref()) {
                Ok(renderer) => Some(Box::new(renderer) as Box<dyn GlyphRenderer>),
                Err(e) => {
                    warn!(error = %e, "No usable font, text overlays disabled");
                    None
                }
            }
        } else {
            None
        };
        Self::with_renderer(display, renderer)
    }

    /// Build with an explicit text renderer.
    pub fn with_renderer(display: &DisplayConfig, renderer: Option<Box<dyn GlyphRenderer>>) -> Self {
        Self { foreground: Foreground::load(display), renderer }
    }

    /// Reload everything derived from `display` after a configuration reload.
    pub fn rebuild(&mut self, display: &DisplayConfig) {
        *self = Self::new(display);
    }

    pub fn has_foreground(&self) -> bool {
        self.foreground.is_some()
    }

    /// Compose one frame on top of `background`.
    pub fn compose(
        &self,
        mut background: RgbaImage,
        display: &DisplayConfig,
        snapshot: &MetricsSnapshot,
        now: NaiveDateTime,
    ) -> RgbImage {
        if let Some(foreground) = &self.foreground {
            imageops::overlay(
                &mut background,
                &foreground.image,
                foreground.position.x,
                foreground.position.y,
            );
        }

        if let Some(renderer) = &self.renderer {
            for layer in text_layers(display, snapshot, now) {
                renderer.draw_text(&mut background, &layer.text, layer.position, &layer.style);
            }
        }

        DynamicImage::ImageRgba8(background).into_rgb8()
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("foreground", &self.foreground.is_some())
            .field("text", &self.renderer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundType, ForegroundConfig, MetricOverlay, TextOverlay};
    use crate::metrics::{MetricKey, MetricValue};
    use crate::test_utils::write_png;
    use chrono::NaiveDate;
    use image::Rgba;
    use std::sync::{Arc, Mutex};

    fn morning() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7).unwrap().and_hms_opt(9, 5, 0).unwrap()
    }

    fn display() -> DisplayConfig {
        DisplayConfig::background_only(BackgroundType::Image, "bg.png")
    }

    fn overlay(key: MetricKey, label: &str, unit: &str, decimals: usize) -> MetricOverlay {
        MetricOverlay {
            key,
            label: label.into(),
            unit: unit.into(),
            position: Position { x: 1, y: 2 },
            style: TextStyle { decimals, ..TextStyle::default() },
        }
    }

    #[test]
    fn metric_text_and_missing_values() {
        let mut display = display();
        display.metrics = vec![
            overlay(MetricKey::CpuUsage, "CPU ", "%", 0),
            overlay(MetricKey::CpuTemperature, "", "°C", 1),
            overlay(MetricKey::GpuName, "", "", 0),
            overlay(MetricKey::GpuUsage, "GPU ", "%", 0),
        ];
        let snapshot = MetricsSnapshot::new()
            .with(MetricKey::CpuUsage, MetricValue::Number(42.4))
            .with(MetricKey::CpuTemperature, MetricValue::Number(55.26))
            .with(MetricKey::GpuName, MetricValue::Text("Radeon".into()));

        let texts: Vec<String> = text_layers(&display, &snapshot, morning()).into_iter().map(|l| l.text).collect();
        assert_eq!(texts, ["CPU 42%", "55.3°C", "Radeon", "GPU N/A%"]);
    }

    #[test]
    fn layers_are_metrics_then_date_then_time() {
        let mut display = display();
        display.time = Some(TextOverlay::default());
        display.date = Some(TextOverlay::default());
        display.metrics = vec![overlay(MetricKey::CpuUsage, "", "", 0)];

        let texts: Vec<String> = text_layers(&display, &MetricsSnapshot::new(), morning())
            .into_iter()
            .map(|l| l.text)
            .collect();
        assert_eq!(texts, ["N/A", "07/03", "09:05"]);
    }

    /// Records drawn text instead of rasterising it.
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl GlyphRenderer for Recorder {
        fn draw_text(&self, _: &mut RgbaImage, text: &str, _: Position, _: &TextStyle) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn compose_draws_layers_in_order_and_is_opaque() {
        let mut display = display();
        display.metrics = vec![overlay(MetricKey::GpuUsage, "G", "", 0)];
        display.time = Some(TextOverlay::default());

        let drawn = Arc::new(Mutex::new(Vec::new()));
        let compositor = Compositor::with_renderer(&display, Some(Box::new(Recorder(drawn.clone()))));

        let background = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 0]));
        let frame = compositor.compose(background, &display, &MetricsSnapshot::new(), morning());

        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(frame.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(*drawn.lock().unwrap(), ["GN/A", "09:05"]);
    }

    #[test]
    fn foreground_alpha_is_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fg.png");
        write_png(&path, 2, 2, [255, 255, 255, 255]);

        let mut display = display();
        display.foreground = Some(ForegroundConfig { path, position: Position { x: 1, y: 1 }, alpha: 0.5 });
        let compositor = Compositor::with_renderer(&display, None);
        assert!(compositor.has_foreground());

        let background = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let frame = compositor.compose(background, &display, &MetricsSnapshot::new(), morning());

        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0]);
        let blended = frame.get_pixel(1, 1).0[0];
        assert!((120..=135).contains(&blended), "got {blended}");
        assert_eq!(frame.get_pixel(3, 3).0, [0, 0, 0]);
    }

    #[test]
    fn missing_foreground_is_skipped() {
        let mut display = display();
        display.foreground = Some(ForegroundConfig {
            path: "/nonexistent/fg.png".into(),
            position: Position::default(),
            alpha: 1.0,
        });
        let compositor = Compositor::with_renderer(&display, None);
        assert!(!compositor.has_foreground());

        let frame = compositor.compose(
            RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])),
            &display,
            &MetricsSnapshot::new(),
            morning(),
        );
        assert_eq!(frame.get_pixel(1, 1).0, [1, 2, 3]);
    }

    #[test]
    fn text_without_font_is_skipped() {
        let mut display = display();
        display.font_path = Some("/nonexistent/font.ttf".into());
        display.date = Some(TextOverlay::default());

        let compositor = Compositor::new(&display);
        let frame = compositor.compose(
            RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])),
            &display,
            &MetricsSnapshot::new(),
            morning(),
        );
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
