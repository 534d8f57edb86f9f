//! Error types for panel rendering and device transport.
//!
//! All errors implement `std::error::Error` and carry enough structured context to
//! log a fatal fault in full or to decide whether a transport fault can be recovered.
//!
//! ## Error Categories
//!
//! - **Device Errors**: enumeration, endpoint discovery, claim/release
//! - **Transfer Errors**: short writes and timeouts on individual transfers
//! - **Media Errors**: background/foreground images, GIFs, videos
//! - **Configuration Errors**: unreadable or invalid service configuration
//! - **Telemetry Errors**: metrics provider failures (absorbed by the collector)
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use panelcast::PanelError;
//!
//! let error = PanelError::ShortWrite { written: 12, expected: 513 };
//! assert!(error.is_transport_fault());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for panel operations.
pub type Result<T, E = PanelError> = std::result::Result<T, E>;

/// Main error type for panel operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PanelError {
    #[error("Device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("No supported device found via HID or USB")]
    NoSupportedDeviceFound,

    #[error("No usable OUT endpoint on device {vendor_id:04x}:{product_id:04x}")]
    NoUsableEndpoint { vendor_id: u16, product_id: u16 },

    #[error("Short write: {written}/{expected} bytes transferred")]
    ShortWrite { written: usize, expected: usize },

    #[error("Transfer timed out after {duration:?}")]
    TransportTimeout { duration: Duration },

    #[error("Transport operation '{operation}' failed")]
    Transport {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Device unavailable after {attempts} consecutive faults")]
    DeviceUnavailable { attempts: u32 },

    #[error("Device session is closed")]
    SessionClosed,

    #[error("Background task '{task}' failed: {details}")]
    TaskFailed { task: String, details: String },

    #[error("Payload of {len} bytes does not match any known frame layout")]
    UnknownPayloadSize { len: usize },

    #[error("Unsupported media format for {path}: {details}")]
    UnsupportedMediaFormat { path: PathBuf, details: String },

    #[error("Failed to load configuration {path}: {details}")]
    ConfigLoad { path: PathBuf, details: String },

    #[error("Metrics provider '{provider}' failed: {details}")]
    MetricsProvider { provider: String, details: String },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing failed: {context}")]
    Image {
        context: String,
        #[source]
        source: image::ImageError,
    },
}

impl PanelError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PanelError::DeviceNotFound { .. } => true,
            PanelError::ShortWrite { .. } => true,
            PanelError::TransportTimeout { .. } => true,
            PanelError::Transport { .. } => true,
            PanelError::MetricsProvider { .. } => true,
            PanelError::NoSupportedDeviceFound => false,
            PanelError::NoUsableEndpoint { .. } => false,
            PanelError::DeviceUnavailable { .. } => false,
            PanelError::SessionClosed => false,
            PanelError::TaskFailed { .. } => false,
            PanelError::UnknownPayloadSize { .. } => false,
            PanelError::UnsupportedMediaFormat { .. } => false,
            PanelError::ConfigLoad { .. } => false,
            PanelError::File { .. } => false,
            PanelError::Image { .. } => false,
        }
    }

    /// Returns whether a device session should recover from this error by reconnecting.
    ///
    /// Only faults raised by the transport itself qualify; a missing device during
    /// rediscovery counts because the panel may still be re-enumerating.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            PanelError::ShortWrite { .. }
                | PanelError::TransportTimeout { .. }
                | PanelError::Transport { .. }
                | PanelError::DeviceNotFound { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PanelError::DeviceNotFound { .. } | PanelError::NoSupportedDeviceFound => vec![
                "Check that the panel's USB cable is connected",
                "Verify vendor_id/product_id in the configuration",
                "Ensure udev rules grant access to the device",
            ],
            PanelError::NoUsableEndpoint { .. } => vec![
                "Verify the configured profile matches the connected panel",
                "Check whether another driver has taken over the device",
            ],
            PanelError::ShortWrite { .. }
            | PanelError::TransportTimeout { .. }
            | PanelError::Transport { .. } => vec![
                "Reconnect the panel",
                "Try a different USB port or cable",
                "Check dmesg for USB resets",
            ],
            PanelError::DeviceUnavailable { .. } => vec![
                "Unplug and replug the panel",
                "Increase session.retry_attempts or session.retry_delay_ms",
                "Restart the service",
            ],
            PanelError::SessionClosed => vec!["Open a new device session"],
            PanelError::TaskFailed { .. } => vec![
                "Check the log for a panic message",
                "Restart the service",
            ],
            PanelError::UnknownPayloadSize { .. } => vec![
                "Check that the capture comes from a supported profile",
                "Verify the capture was not truncated",
            ],
            PanelError::UnsupportedMediaFormat { .. } => vec![
                "Convert the media to a supported format",
                "Check that ffmpeg is installed for video backgrounds",
            ],
            PanelError::ConfigLoad { .. } => vec![
                "Check the configuration file exists and is readable",
                "Validate the YAML syntax",
                "Compare against the documented configuration keys",
            ],
            PanelError::MetricsProvider { .. } => vec![
                "Check sensor drivers are loaded",
                "Verify vendor utilities (nvidia-smi) are installed",
            ],
            PanelError::File { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            PanelError::Image { .. } => vec![
                "Verify the image file is not corrupted",
                "Convert the image to PNG or JPEG",
            ],
        }
    }

    /// Helper constructor for transport errors with an underlying cause.
    pub fn transport(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PanelError::Transport { operation: operation.into(), source: source.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PanelError::File { path: path.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config_load(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        PanelError::ConfigLoad { path: path.into(), details: details.into() }
    }

    /// Helper constructor for unsupported media errors.
    pub fn unsupported_media(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        PanelError::UnsupportedMediaFormat { path: path.into(), details: details.into() }
    }

    /// Helper constructor for image errors.
    pub fn image(context: impl Into<String>, source: image::ImageError) -> Self {
        PanelError::Image { context: context.into(), source }
    }
}

impl From<std::io::Error> for PanelError {
    fn from(err: std::io::Error) -> Self {
        PanelError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<rusb::Error> for PanelError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => PanelError::TransportTimeout { duration: Duration::ZERO },
            other => PanelError::transport("usb", other),
        }
    }
}

impl From<hidapi::HidError> for PanelError {
    fn from(err: hidapi::HidError) -> Self {
        PanelError::transport("hid", err.to_string())
    }
}

impl From<image::ImageError> for PanelError {
    fn from(err: image::ImageError) -> Self {
        PanelError::Image { context: "image".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            written in 0usize..4096usize,
            expected in 1usize..4096usize,
            vendor_id in any::<u16>(),
            product_id in any::<u16>(),
            details in ".*"
          ) {
            let short = PanelError::ShortWrite { written, expected };
            let msg = short.to_string();
            prop_assert!(msg.contains(&written.to_string()));
            prop_assert!(msg.contains(&expected.to_string()));

            let missing = PanelError::DeviceNotFound { vendor_id, product_id };
            let vid_hex = format!("{:04x}", vendor_id);
            let pid_hex = format!("{:04x}", product_id);
            prop_assert!(missing.to_string().contains(&vid_hex));
            prop_assert!(missing.to_string().contains(&pid_hex));

            let config = PanelError::config_load("/etc/panel.yaml", details.clone());
            prop_assert!(config.to_string().contains(&details));
          }
        }
    }

    #[test]
    fn transport_faults_are_recoverable() {
        let faults = [
            PanelError::ShortWrite { written: 0, expected: 65 },
            PanelError::TransportTimeout { duration: Duration::from_secs(5) },
            PanelError::transport("write", std::io::Error::other("pipe")),
            PanelError::DeviceNotFound { vendor_id: 0x0418, product_id: 0x5304 },
        ];
        for fault in &faults {
            assert!(fault.is_transport_fault(), "{fault} should trigger reconnect");
            assert!(fault.is_retryable());
        }
    }

    #[test]
    fn construction_failures_are_fatal() {
        let errors = [
            PanelError::config_load("/nope.yaml", "missing"),
            PanelError::unsupported_media("clip.xyz", "unknown extension"),
            PanelError::DeviceUnavailable { attempts: 3 },
            PanelError::NoSupportedDeviceFound,
        ];
        for error in &errors {
            assert!(!error.is_transport_fault());
            assert!(!error.is_retryable());
            assert!(!error.recovery_suggestions().is_empty());
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<PanelError>();
    }

    #[test]
    fn rusb_timeout_maps_to_transport_timeout() {
        let err: PanelError = rusb::Error::Timeout.into();
        assert!(matches!(err, PanelError::TransportTimeout { .. }));

        let err: PanelError = rusb::Error::NoDevice.into();
        assert!(matches!(err, PanelError::Transport { .. }));
    }

    #[test]
    fn source_chain_is_preserved() {
        let err = PanelError::transport("claim_interface", std::io::Error::other("busy"));
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "busy");
    }
}
