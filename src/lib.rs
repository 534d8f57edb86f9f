//! Drive USB/HID cooler LCD panels with composited system telemetry.
//!
//! Panelcast renders a background (still image, GIF, video or a rotating image
//! collection) with a foreground overlay and live CPU/GPU metrics, encodes the result
//! in the panel's native pixel format and streams it over HID reports or USB bulk
//! transfers.
//!
//! # Features
//!
//! - **Device profiles**: built-in wire formats for the supported panel variants
//! - **Robust transport**: endpoint discovery, kernel driver detachment, bounded
//!   reconnect on short writes and timeouts
//! - **Hot reload**: the background and overlays are rebuilt when the configuration
//!   file changes
//! - **Non-blocking telemetry**: metrics are polled on the blocking pool and published
//!   as immutable snapshots
//!
//! # Pipeline
//!
//! ```text
//! MetricsCollector ─ snapshot ─┐
//! FrameSourceManager ─ frame ──┴─> Compositor ─> encode ─> packetize ─> DeviceSession
//! ```
//!
//! ## Example (encode a frame for a profile)
//!
//! ```rust
//! use image::{Rgb, RgbImage};
//! use panelcast::{encode, packet, profile};
//!
//! let profile = profile::by_name("hid-320x320").expect("built-in profile");
//! let raster = RgbImage::from_pixel(profile.width, profile.height, Rgb([0, 0, 255]));
//!
//! let pixels = encode::encode(&raster, profile.pixel_format)?;
//! let payload = packet::EncodedPayload::new(profile, pixels);
//! let packets = packet::packetize(&payload, profile);
//! assert!(packets.iter().all(|p| p.len() == profile.chunk_size + 1));
//! # Ok::<(), panelcast::PanelError>(())
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Device protocol
pub mod encode;
pub mod packet;
pub mod profile;
pub mod session;
pub mod transport;

// Frame pipeline
pub mod compositor;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod source;

// Core exports
pub use error::*;

// Main API exports
pub use compositor::Compositor;
pub use config::{DisplayConfig, ServiceConfig};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use orchestrator::{RenderOrchestrator, RenderPipeline};
pub use profile::DeviceProfile;
pub use session::{DeviceSession, SessionOptions, SessionState};
pub use source::{FrameSource, FrameSourceManager};
