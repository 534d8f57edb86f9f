//! Device session: transport lifecycle for one physical panel.
//!
//! A [`DeviceSession`] owns the open transport handle and the claimed interface. It is the
//! only component that writes to, resets or releases the device.
//!
//! ```text
//! Unopened -> Detected -> Configured -> Streaming
//!                            ^              |
//!                            |   transport  v
//!                            +---------- Faulted --(retry cap)--> DeviceUnavailable
//!
//! close() / drop: any state -> Closed
//! ```
//!
//! Transport faults (short writes, timeouts, transfer errors) are recovered inside
//! [`DeviceSession::transmit`]: the device is reset, the interface released, the device
//! rediscovered and re-claimed, and the whole frame is sent again. After
//! `retry_attempts` consecutive faults the session stays `Faulted` and every further
//! transmit fails with [`PanelError::DeviceUnavailable`].

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::packet::{self, PacketKind, WirePacket};
use crate::profile::{DeviceProfile, Framing};
use crate::transport::{self, Connector, Endpoint, Transport};
use crate::{PanelError, Result};

/// Interval between open attempts while waiting for a device to re-enumerate.
const REDISCOVERY_POLL: Duration = Duration::from_millis(100);

/// Lifecycle state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Detected,
    Configured,
    Streaming,
    Faulted,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Detected => "detected",
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
            SessionState::Faulted => "faulted",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Retry and timeout settings for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Consecutive transport faults tolerated before giving up.
    pub retry_attempts: u32,
    /// Pause before each reconnect.
    pub retry_delay: Duration,
    /// Per-transfer timeout.
    pub write_timeout: Duration,
    /// How long a reconnect waits for the device to show up again.
    pub reconnect_timeout: Duration,
    /// Overrides the profile's settle window.
    pub settle: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
            reconnect_timeout: Duration::from_secs(5),
            settle: None,
        }
    }
}

/// An open transport with its claimed interface.
///
/// The interface is released when the link is dropped, so every exit path releases it
/// exactly once.
struct Link {
    transport: Box<dyn Transport>,
    interface: u8,
    out: Endpoint,
    input: Option<Endpoint>,
}

impl Link {
    fn establish(mut transport: Box<dyn Transport>, profile: &DeviceProfile) -> Result<Self> {
        transport.set_active_configuration()?;

        let interfaces = transport.interfaces()?;
        let (interface, out, input) = transport::select_endpoints(&interfaces, profile.transport_kind)
            .ok_or(PanelError::NoUsableEndpoint {
                vendor_id: profile.vendor_id,
                product_id: profile.product_id,
            })?;

        if transport.kernel_driver_active(interface)? {
            debug!(interface, "Detaching kernel driver");
            transport.detach_kernel_driver(interface)?;
        }
        transport.claim_interface(interface)?;
        debug!(interface, out = out.address, input = ?input.map(|e| e.address), "Claimed interface");

        Ok(Self { transport, interface, out, input })
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let written = self.transport.write(&self.out, data, timeout)?;
        if written != data.len() {
            return Err(PanelError::ShortWrite { written, expected: data.len() });
        }
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        match self.transport.release_interface(self.interface) {
            Ok(()) => debug!(interface = self.interface, "Released interface"),
            Err(e) => warn!(interface = self.interface, error = %e, "Failed to release interface"),
        }
    }
}

/// Exclusive owner of one panel's transport.
pub struct DeviceSession {
    profile: DeviceProfile,
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    state: SessionState,
    link: Option<Link>,
    exhausted: bool,
    frames: u64,
}

impl DeviceSession {
    /// Open the device described by `profile` through `connector` and claim its interface.
    ///
    /// Fails with [`PanelError::DeviceNotFound`] when the connector has no matching device
    /// and with [`PanelError::NoUsableEndpoint`] when no interface can carry the stream.
    pub fn open(
        profile: DeviceProfile,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut session = Self {
            profile,
            connector,
            options,
            state: SessionState::Unopened,
            link: None,
            exhausted: false,
            frames: 0,
        };

        let transport = session.discover()?.ok_or(PanelError::DeviceNotFound {
            vendor_id: session.profile.vendor_id,
            product_id: session.profile.product_id,
        })?;
        session.state = SessionState::Detected;
        session.configure(transport)?;

        info!(profile = %session.profile, "Device session opened");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Frames transmitted successfully.
    pub fn frames_sent(&self) -> u64 {
        self.frames
    }

    fn settle_window(&self) -> Duration {
        self.options.settle.unwrap_or(self.profile.settle)
    }

    fn discover(&self) -> Result<Option<Box<dyn Transport>>> {
        self.connector.open(self.profile.vendor_id, self.profile.product_id)
    }

    fn configure(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.link = Some(Link::establish(transport, &self.profile)?);
        self.state = SessionState::Configured;

        let settle = self.settle_window();
        if !settle.is_zero() {
            debug!(?settle, "Waiting for device to settle");
            thread::sleep(settle);
        }
        Ok(())
    }

    fn link(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or(PanelError::DeviceNotFound {
            vendor_id: self.profile.vendor_id,
            product_id: self.profile.product_id,
        })
    }

    /// Write one packet, blocking until it completes or times out.
    pub fn write(&mut self, packet: &WirePacket) -> Result<()> {
        self.transmit(std::slice::from_ref(packet))
    }

    /// Send one frame's packets in order, recovering from transport faults.
    pub fn transmit(&mut self, packets: &[WirePacket]) -> Result<()> {
        self.with_recovery(|session| session.send_packets(packets))?;
        self.frames += 1;
        trace!(frames = self.frames, packets = packets.len(), "Frame transmitted");
        Ok(())
    }

    fn send_packets(&mut self, packets: &[WirePacket]) -> Result<()> {
        let timeout = self.options.write_timeout;
        let link = self.link()?;
        for packet in packets {
            match packet.kind() {
                PacketKind::Terminator { best_effort: true } => {
                    if let Err(e) = link.write(packet.as_bytes(), timeout) {
                        debug!(error = %e, "Ignoring failed zero-length terminator");
                    }
                }
                _ => link.write(packet.as_bytes(), timeout)?,
            }
        }
        Ok(())
    }

    /// Run `op`, reconnecting after each transport fault until the retry cap is reached.
    fn with_recovery<T>(&mut self, mut op: impl FnMut(&mut Self) -> Result<T>) -> Result<T> {
        match self.state {
            SessionState::Closed => return Err(PanelError::SessionClosed),
            _ if self.exhausted => {
                return Err(PanelError::DeviceUnavailable { attempts: self.options.retry_attempts });
            }
            _ => {}
        }

        let mut faults = 0u32;
        loop {
            let err = match op(self) {
                Ok(value) => {
                    if self.state != SessionState::Streaming {
                        info!(profile = self.profile.name, "Streaming");
                        self.state = SessionState::Streaming;
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transport_fault() => e,
                Err(e) => return Err(e),
            };

            faults += 1;
            self.state = SessionState::Faulted;
            warn!(
                error = %err,
                fault = faults,
                max = self.options.retry_attempts,
                "Transport fault"
            );

            if faults >= self.options.retry_attempts {
                self.exhausted = true;
                error!(attempts = faults, profile = %self.profile, "Giving up on device");
                return Err(PanelError::DeviceUnavailable { attempts: faults });
            }

            thread::sleep(self.options.retry_delay);
            if let Err(e) = self.reconnect() {
                warn!(error = %e, "Reconnect failed");
            }
        }
    }

    /// Issue a transport-level reset.
    ///
    /// Failures are logged and returned.
    pub fn reset(&mut self) -> Result<()> {
        let result = self.link().and_then(|link| link.transport.reset());
        match &result {
            Ok(()) => info!(profile = self.profile.name, "Device reset"),
            Err(e) => warn!(error = %e, "Device reset failed"),
        }
        result
    }

    fn reconnect(&mut self) -> Result<()> {
        if self.link.is_some() {
            // Best effort, the device may already be gone.
            let _ = self.reset();
        }
        self.link = None;

        let deadline = Instant::now() + self.options.reconnect_timeout;
        let transport = loop {
            match self.discover() {
                Ok(Some(transport)) => break transport,
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Rediscovery attempt failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PanelError::DeviceNotFound {
                    vendor_id: self.profile.vendor_id,
                    product_id: self.profile.product_id,
                });
            }
            thread::sleep(REDISCOVERY_POLL.min(deadline - now));
        };

        self.state = SessionState::Detected;
        self.configure(transport)?;
        info!(profile = %self.profile, "Reconnected");
        Ok(())
    }

    /// Read from the IN endpoint. Diagnostics only; no profile expects a response.
    pub fn read(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        if self.state == SessionState::Closed {
            return Err(PanelError::SessionClosed);
        }
        let (vendor_id, product_id) = (self.profile.vendor_id, self.profile.product_id);
        let link = self.link()?;
        let input = link.input.ok_or(PanelError::NoUsableEndpoint { vendor_id, product_id })?;
        link.transport.read(&input, len, timeout)
    }

    /// Announce end of stream where the profile has one, then release and dispose.
    ///
    /// Release and disposal run even when the end-of-stream write fails.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Framing::Bulk { .. } = self.profile.framing
            && !self.exhausted
            && let Some(link) = self.link.as_mut()
        {
            let timeout = self.options.write_timeout;
            let mut sent = true;
            for packet in packet::end_of_stream(&self.profile) {
                if let Err(e) = link.write(packet.as_bytes(), timeout) {
                    warn!(error = %e, "Failed to send end of stream");
                    sent = false;
                    break;
                }
            }
            if sent {
                let settle = self.settle_window();
                if !settle.is_zero() {
                    thread::sleep(settle);
                }
            }
        }

        self.link = None;
        self.state = SessionState::Closed;
        info!(profile = self.profile.name, frames = self.frames, "Device session closed");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("profile", &self.profile.name)
            .field("state", &self.state)
            .field("frames", &self.frames)
            .finish()
    }
}
