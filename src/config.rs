//! Service configuration.
//!
//! One YAML document configures the service:
//!
//! ```yaml
//! device:
//!   vendor_id: 0x87AD
//!   product_id: 0x70DB
//!   variant: bulk-320x320      # optional, picks among profiles sharing ids
//! display:
//!   background: { type: image, path: /usr/share/panelcast/bg.png }
//!   foreground: { path: overlay.png, position: { x: 0, y: 0 }, alpha: 0.8 }
//!   font_path: /usr/share/fonts/TTF/DejaVuSans.ttf
//!   metrics:
//!     - { key: cpu_usage, label: "CPU ", unit: "%", position: { x: 10, y: 10 } }
//!   date: { position: { x: 10, y: 280 } }
//!   time: { position: { x: 200, y: 280 }, style: { font_size: 32, color: "#FF8800" } }
//! session:
//!   retry_attempts: 5
//! metrics_interval_ms: 1000
//! ```
//!
//! Only `device` and `display` are required. The display section is re-read on every
//! hot reload, so the file must stay readable while the service runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::metrics::MetricKey;
use crate::session::SessionOptions;
use crate::{PanelError, Result};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub device: DeviceConfig,
    pub display: DisplayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_metrics_interval_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

/// Which panel to drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Retry and timeout knobs for the device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub write_timeout_ms: u64,
    pub reconnect_timeout_ms: u64,
    pub settle_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 1000,
            write_timeout_ms: 5000,
            reconnect_timeout_ms: 5000,
            settle_ms: None,
        }
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        SessionOptions {
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            reconnect_timeout: Duration::from_millis(config.reconnect_timeout_ms),
            settle: config.settle_ms.map(Duration::from_millis),
        }
    }
}

/// What is drawn on the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub background: BackgroundConfig,
    #[serde(default)]
    pub foreground: Option<ForegroundConfig>,
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default)]
    pub metrics: Vec<MetricOverlay>,
    #[serde(default)]
    pub date: Option<TextOverlay>,
    #[serde(default)]
    pub time: Option<TextOverlay>,
}

impl DisplayConfig {
    /// Display with only a background and no overlays.
    pub fn background_only(kind: BackgroundType, path: impl Into<PathBuf>) -> Self {
        Self {
            background: BackgroundConfig { kind, path: path.into() },
            foreground: None,
            font_path: None,
            metrics: Vec::new(),
            date: None,
            time: None,
        }
    }

    /// Resolve relative paths against `base`.
    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.background.path);
        if let Some(foreground) = &mut self.foreground {
            resolve(&mut foreground.path);
        }
        if let Some(font) = &mut self.font_path {
            resolve(font);
        }
    }
}

/// Kind of background media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundType {
    Image,
    Gif,
    Video,
    #[serde(alias = "collection")]
    ImageCollection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(rename = "type")]
    pub kind: BackgroundType,
    pub path: PathBuf,
}

/// Pixel position of an overlay's top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForegroundConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

fn default_alpha() -> f32 {
    1.0
}

/// RGBA colour written as `#RRGGBB` or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const WHITE: Color = Color([255, 255, 255, 255]);
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let hex = value.strip_prefix('#').unwrap_or(&value);
        if !(hex.len() == 6 || hex.len() == 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid colour '{value}', expected #RRGGBB or #RRGGBBAA"));
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Color([byte(0)?, byte(2)?, byte(4)?, alpha]))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        let [r, g, b, a] = color.0;
        format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
    }
}

/// How overlay text is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub font_size: f32,
    pub color: Color,
    /// Fractional digits for numeric metric values.
    pub decimals: usize,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self { font_size: 20.0, color: Color::WHITE, decimals: 0 }
    }
}

/// A metric value drawn as `label + value + unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOverlay {
    pub key: MetricKey,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub style: TextStyle,
}

/// Date or time overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub style: TextStyle,
}

impl ServiceConfig {
    /// Load and validate a configuration file.
    ///
    /// Relative media and font paths are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PanelError::config_load(path, format!("cannot read file: {e}")))?;
        let mut config = Self::from_yaml(&contents).map_err(|e| match e {
            PanelError::ConfigLoad { details, .. } => PanelError::config_load(path, details),
            other => other,
        })?;
        if let Some(base) = path.parent() {
            config.display.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(contents)
            .map_err(|e| PanelError::config_load("<inline>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |details: String| Err(PanelError::config_load("<inline>", details));

        if self.session.retry_attempts == 0 {
            return invalid("session.retry_attempts must be at least 1".into());
        }
        if self.session.write_timeout_ms == 0 {
            return invalid("session.write_timeout_ms must be positive".into());
        }
        if self.metrics_interval_ms == 0 {
            return invalid("metrics_interval_ms must be positive".into());
        }
        if let Some(foreground) = &self.display.foreground
            && !(0.0..=1.0).contains(&foreground.alpha)
        {
            return invalid(format!("display.foreground.alpha {} is outside [0, 1]", foreground.alpha));
        }

        let styles = self
            .display
            .metrics
            .iter()
            .map(|m| &m.style)
            .chain(self.display.date.iter().map(|d| &d.style))
            .chain(self.display.time.iter().map(|t| &t.style));
        for style in styles {
            if style.font_size.is_nan() || style.font_size <= 0.0 {
                return invalid(format!("font_size {} must be positive", style.font_size));
            }
        }
        Ok(())
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Modification time of a file, used to detect configuration changes.
pub fn modified_time(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| PanelError::file_error(path, e))
}
