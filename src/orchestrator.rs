//! The render loop.
//!
//! Each tick takes the latest metrics snapshot, composes a frame over the current
//! background, encodes and packetizes it for the device profile and transmits it. The loop
//! then waits for the frame's display duration.
//!
//! The render state ([`RenderPipeline`]) is owned by the loop. It is moved onto the blocking
//! pool for each tick, where USB writes and image work happen, and handed back afterwards,
//! so no lock is ever shared with the metrics poller.
//!
//! # Example
//!
//! ```no_run
//! use panelcast::orchestrator::{self, RenderOrchestrator, RenderPipeline};
//! use panelcast::{Compositor, FrameSourceManager, MetricsCollector, ServiceConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> panelcast::Result<()> {
//! let config = ServiceConfig::load("panel.yaml")?;
//! let session = orchestrator::open_device(&config, &orchestrator::default_connectors()?)?;
//! let frames = FrameSourceManager::from_config_file(
//!     "panel.yaml",
//!     session.profile().width,
//!     session.profile().height,
//! )?;
//! let compositor = Compositor::new(frames.display());
//! let pipeline = RenderPipeline::new(session, frames, compositor);
//! let collector = MetricsCollector::spawn(Vec::new(), config.metrics_interval());
//!
//! RenderOrchestrator::new(pipeline, collector, config.shutdown_timeout())
//!     .run(CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::compositor::Compositor;
use crate::config::ServiceConfig;
use crate::encode;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::packet::{self, EncodedPayload};
use crate::profile::{self, TransportKind};
use crate::session::{DeviceSession, SessionOptions};
use crate::source::FrameSourceManager;
use crate::transport::{Connector, HidConnector, UsbConnector};
use crate::{PanelError, Result};

/// HID first, raw USB second.
///
/// A backend that fails to initialise is skipped with a warning; only when neither is
/// available does this fail.
pub fn default_connectors() -> Result<Vec<Arc<dyn Connector>>> {
    available_connectors([
        ("hid", HidConnector::new().map(|c| Arc::new(c) as Arc<dyn Connector>)),
        ("usb", UsbConnector::new().map(|c| Arc::new(c) as Arc<dyn Connector>)),
    ])
}

fn available_connectors<const N: usize>(
    backends: [(&str, Result<Arc<dyn Connector>>); N],
) -> Result<Vec<Arc<dyn Connector>>> {
    let mut connectors = Vec::with_capacity(N);
    let mut last_error = None;
    for (name, backend) in backends {
        match backend {
            Ok(connector) => connectors.push(connector),
            Err(e) => {
                warn!(backend = name, error = %e, "Backend unavailable, skipping");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if connectors.is_empty() => Err(e),
        _ => Ok(connectors),
    }
}

/// Open a session for the configured device.
///
/// Candidate profiles are those matching the configured vendor/product id (and variant,
/// when given). HID candidates are tried before raw USB ones. A candidate that is present
/// but fails to open is logged and the search moves on. A bulk device is reset once after
/// opening so streaming starts from a clean state. Fails with
/// [`PanelError::NoSupportedDeviceFound`] when no candidate can be opened.
pub fn open_device(config: &ServiceConfig, connectors: &[Arc<dyn Connector>]) -> Result<DeviceSession> {
    let device = &config.device;
    let options = SessionOptions::from(&config.session);

    let candidates: Vec<_> = profile::BUILTIN_PROFILES
        .iter()
        .filter(|p| p.matches(device.vendor_id, device.product_id))
        .filter(|p| device.variant.as_deref().is_none_or(|variant| p.name == variant))
        .collect();

    for kind in [TransportKind::Hid, TransportKind::UsbBulk] {
        for candidate in candidates.iter().filter(|p| p.transport_kind == kind) {
            for connector in connectors.iter().filter(|c| c.kind() == kind) {
                match DeviceSession::open((*candidate).clone(), connector.clone(), options.clone()) {
                    Ok(mut session) => {
                        if kind == TransportKind::UsbBulk {
                            // Failures are logged by the session; streaming still works.
                            let _ = session.reset();
                        }
                        return Ok(session);
                    }
                    Err(PanelError::DeviceNotFound { .. }) => {
                        debug!(profile = candidate.name, "Device not present");
                    }
                    Err(e) => {
                        warn!(
                            profile = candidate.name,
                            ?kind,
                            error = %e,
                            "Cannot open device, trying next candidate"
                        );
                    }
                }
            }
        }
    }

    Err(PanelError::NoSupportedDeviceFound)
}

/// Everything one render tick touches.
#[derive(Debug)]
pub struct RenderPipeline {
    session: DeviceSession,
    frames: FrameSourceManager,
    compositor: Compositor,
}

impl RenderPipeline {
    pub fn new(session: DeviceSession, frames: FrameSourceManager, compositor: Compositor) -> Self {
        Self { session, frames, compositor }
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn frames(&self) -> &FrameSourceManager {
        &self.frames
    }

    /// Render and transmit one frame. Returns how long it should stay on screen.
    pub fn tick(&mut self, snapshot: &MetricsSnapshot) -> Result<Duration> {
        if self.frames.reload_if_changed() {
            self.compositor.rebuild(self.frames.display());
        }

        let background = self.frames.get_current_frame()?;
        let duration = self.frames.frame_duration();
        let raster = self.compositor.compose(
            background,
            self.frames.display(),
            snapshot,
            Local::now().naive_local(),
        );

        let profile = self.session.profile();
        let pixels = encode::encode(&raster, profile.pixel_format)?;
        let payload = EncodedPayload::new(profile, pixels);
        let packets = packet::packetize(&payload, profile);
        trace!(bytes = payload.len(), packets = packets.len(), ?duration, "Frame ready");

        self.session.transmit(&packets)?;
        Ok(duration)
    }

    /// Release the device. Blocking for bulk profiles' settle window.
    pub fn close(mut self) {
        self.session.close();
    }
}

/// Totals reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped: u64,
}

/// Drives a [`RenderPipeline`] until cancelled or the device is lost.
pub struct RenderOrchestrator {
    pipeline: Option<RenderPipeline>,
    collector: MetricsCollector,
    shutdown_timeout: Duration,
}

impl RenderOrchestrator {
    pub fn new(pipeline: RenderPipeline, collector: MetricsCollector, shutdown_timeout: Duration) -> Self {
        Self { pipeline: Some(pipeline), collector, shutdown_timeout }
    }

    /// Run until `cancel` fires or a fatal fault occurs.
    ///
    /// The metrics collector is stopped and the device released on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunSummary> {
        let result = self.render_loop(&cancel).await;
        if let Err(e) = &result {
            error!(error = %e, suggestions = ?e.recovery_suggestions(), "Render loop failed");
        }
        self.shutdown().await;
        result
    }

    async fn render_loop(&mut self, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        info!("Render loop started");

        while !cancel.is_cancelled() {
            let Some(mut pipeline) = self.pipeline.take() else {
                break;
            };
            let snapshot = self.collector.snapshot();

            let tick = tokio::task::spawn_blocking(move || {
                let outcome = pipeline.tick(&snapshot);
                (pipeline, outcome)
            });
            let (pipeline, outcome) = match tick.await {
                Ok(pair) => pair,
                Err(e) => {
                    return Err(PanelError::TaskFailed { task: "render tick".into(), details: e.to_string() });
                }
            };
            let retry_delay = pipeline.session().options().retry_delay;
            self.pipeline = Some(pipeline);

            let wait = match outcome {
                Ok(duration) => {
                    summary.frames += 1;
                    duration
                }
                Err(e) if e.is_retryable() => {
                    summary.skipped += 1;
                    warn!(error = %e, "Frame skipped");
                    retry_delay
                }
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(frames = summary.frames, skipped = summary.skipped, "Render loop stopped");
        Ok(summary)
    }

    async fn shutdown(&mut self) {
        self.collector.stop(self.shutdown_timeout).await;

        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || pipeline.close()).await {
                warn!(error = %e, "Device close panicked");
            }
        }
        info!("Shutdown complete");
    }
}

impl std::fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("pipeline", &self.pipeline)
            .field("collector_running", &self.collector.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundType, DeviceConfig, DisplayConfig};
    use crate::session::SessionState;
    use crate::test_utils::{MockConnector, MockHandle, WriteOutcome, write_png};

    fn service_config(vendor_id: u16, product_id: u16, variant: Option<&str>) -> ServiceConfig {
        let yaml = format!(
            "device: {{ vendor_id: {vendor_id}, product_id: {product_id} }}\n\
             display:\n  background: {{ type: image, path: bg.png }}\n\
             session: {{ retry_attempts: 2, retry_delay_ms: 1, write_timeout_ms: 50, reconnect_timeout_ms: 1, settle_ms: 0 }}\n"
        );
        let mut config = ServiceConfig::from_yaml(&yaml).unwrap();
        config.device = DeviceConfig { vendor_id, product_id, variant: variant.map(str::to_string) };
        config
    }

    fn connectors(hid: Option<MockHandle>, usb: Option<MockHandle>, vid: u16, pid: u16) -> Vec<Arc<dyn Connector>> {
        let absent = MockHandle::default;
        let hid: Arc<dyn Connector> =
            Arc::new(MockConnector::new(TransportKind::Hid, vid, pid, hid.unwrap_or_else(absent)));
        let usb: Arc<dyn Connector> =
            Arc::new(MockConnector::new(TransportKind::UsbBulk, vid, pid, usb.unwrap_or_else(absent)));
        vec![hid, usb]
    }

    #[test]
    fn hid_device_is_selected() {
        let device = MockHandle::hid();
        let config = service_config(0x0418, 0x5303, None);
        let session = open_device(&config, &connectors(Some(device.clone()), None, 0x0418, 0x5303)).unwrap();

        assert_eq!(session.profile().name, "hid-320x320");
        assert_eq!(session.state(), SessionState::Configured);
        let device = device.lock();
        assert_eq!(device.claims, 1);
        assert_eq!(device.resets, 0, "HID panels are not reset");
    }

    #[test]
    fn bulk_variant_is_selected_by_name() {
        let device = MockHandle::bulk();
        let config = service_config(0x87AD, 0x70DB, Some("bulk-480x480-jpeg"));
        let session = open_device(&config, &connectors(None, Some(device.clone()), 0x87AD, 0x70DB)).unwrap();
        assert_eq!(session.profile().name, "bulk-480x480-jpeg");
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(device.lock().resets, 1);
    }

    #[test]
    fn nothing_present_is_no_supported_device() {
        let config = service_config(0x0418, 0x5303, None);
        assert!(matches!(
            open_device(&config, &connectors(None, None, 0x0418, 0x5303)),
            Err(PanelError::NoSupportedDeviceFound)
        ));

        let unknown = service_config(0x1234, 0x5678, None);
        assert!(matches!(
            open_device(&unknown, &connectors(Some(MockHandle::hid()), None, 0x1234, 0x5678)),
            Err(PanelError::NoSupportedDeviceFound)
        ));
    }

    #[test]
    fn open_failure_moves_on_to_the_next_connector() {
        let denied = MockHandle::bulk();
        denied.lock().fail_open = true;
        let device = MockHandle::bulk();
        let mut connectors = connectors(None, Some(denied.clone()), 0x87AD, 0x70DB);
        connectors.push(Arc::new(MockConnector::new(TransportKind::UsbBulk, 0x87AD, 0x70DB, device.clone())));

        let config = service_config(0x87AD, 0x70DB, None);
        let session = open_device(&config, &connectors).unwrap();

        assert_eq!(session.profile().name, "bulk-320x320");
        assert_eq!(denied.lock().claims, 0);
        assert_eq!(device.lock().claims, 1);
    }

    #[test]
    fn hid_open_failure_is_not_fatal() {
        let denied = MockHandle::hid();
        denied.lock().fail_open = true;
        let config = service_config(0x0418, 0x5303, None);

        assert!(matches!(
            open_device(&config, &connectors(Some(denied), None, 0x0418, 0x5303)),
            Err(PanelError::NoSupportedDeviceFound)
        ));
    }

    #[test]
    fn unavailable_backend_is_skipped() {
        let usb: Arc<dyn Connector> =
            Arc::new(MockConnector::new(TransportKind::UsbBulk, 1, 2, MockHandle::bulk()));
        let connectors = available_connectors([
            ("hid", Err(PanelError::transport("hid_init", "no hidraw backend"))),
            ("usb", Ok(usb)),
        ])
        .unwrap();
        assert_eq!(connectors.len(), 1);
        assert_eq!(connectors[0].kind(), TransportKind::UsbBulk);

        let none = available_connectors([
            ("hid", Err(PanelError::transport("hid_init", "no hidraw backend"))),
            ("usb", Err(PanelError::transport("usb_init", "no libusb"))),
        ]);
        assert!(matches!(none, Err(PanelError::Transport { .. })));
    }

    fn pipeline(device: &MockHandle, dir: &std::path::Path) -> RenderPipeline {
        let background = dir.join("bg.png");
        write_png(&background, 8, 8, [0, 0, 255, 255]);

        let config = service_config(0x0418, 0x5303, None);
        let session = open_device(&config, &connectors(Some(device.clone()), None, 0x0418, 0x5303)).unwrap();
        let (width, height) = (session.profile().width, session.profile().height);
        let frames = FrameSourceManager::new(
            DisplayConfig::background_only(BackgroundType::Image, &background),
            width,
            height,
        )
        .unwrap();
        let compositor = Compositor::with_renderer(frames.display(), None);
        RenderPipeline::new(session, frames, compositor)
    }

    #[test]
    fn tick_transmits_a_whole_frame() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockHandle::hid();
        let mut pipeline = pipeline(&device, dir.path());

        let duration = pipeline.tick(&MetricsSnapshot::new()).unwrap();
        assert_eq!(duration, Duration::from_secs(1));

        let profile = pipeline.session().profile().clone();
        let expected = (profile.header_bytes(0).len() + 320 * 320 * 2).div_ceil(64) * 65;
        assert_eq!(device.lock().bytes_written(), expected);
        assert_eq!(pipeline.session().state(), SessionState::Streaming);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_stops_collector_and_releases_device() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockHandle::hid();
        let pipeline = pipeline(&device, dir.path());
        let collector = MetricsCollector::spawn(Vec::new(), Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let orchestrator = RenderOrchestrator::new(pipeline, collector, Duration::from_secs(1));
        let handle = tokio::spawn(orchestrator.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert!(summary.frames >= 1);
        let device = device.lock();
        assert_eq!(device.claims, 1);
        assert_eq!(device.releases, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exhausted_device_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockHandle::hid();
        let pipeline = pipeline(&device, dir.path());
        device.lock().default_outcome = Some(WriteOutcome::Timeout);
        let collector = MetricsCollector::spawn(Vec::new(), Duration::from_millis(10));

        let result = RenderOrchestrator::new(pipeline, collector, Duration::from_secs(1))
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PanelError::DeviceUnavailable { attempts: 2 })));
        let device = device.lock();
        assert_eq!(device.claims, 2);
        assert_eq!(device.releases, device.claims);
    }
}
