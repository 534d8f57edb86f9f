//! Transport primitives for talking to panels.
//!
//! The OS-level USB and HID libraries are wrapped behind two small traits:
//!
//! - [`Connector`] finds a device by vendor/product id and opens it.
//! - [`Transport`] is the open handle: configuration, interface claim/release,
//!   endpoint transfers with a timeout, and reset.
//!
//! [`DeviceSession`](crate::session::DeviceSession) is the only caller of these traits;
//! tests drive it with an in-memory transport instead of real hardware.

pub mod hid;
pub mod usb;

use std::time::Duration;

use crate::Result;
use crate::profile::TransportKind;

pub use hid::HidConnector;
pub use usb::UsbConnector;

/// Endpoint direction relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// USB transfer type of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// An endpoint on a claimed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u8,
    pub direction: Direction,
    pub transfer: TransferKind,
}

impl Endpoint {
    pub fn is_out(&self) -> bool {
        self.direction == Direction::Out
    }

    pub fn is_bulk_out(&self) -> bool {
        self.is_out() && self.transfer == TransferKind::Bulk
    }
}

/// Interface class code for vendor-specific interfaces.
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Summary of one interface of the active configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub endpoints: Vec<Endpoint>,
}

/// An open device handle.
///
/// All calls block the current thread; timeouts are per transfer.
pub trait Transport: Send {
    /// Select the device's configuration. A no-op when it is already active.
    fn set_active_configuration(&mut self) -> Result<()>;

    /// Interfaces and endpoints of the active configuration.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;

    fn kernel_driver_active(&self, interface: u8) -> Result<bool>;

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()>;

    fn claim_interface(&mut self, interface: u8) -> Result<()>;

    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Write `data` to an OUT endpoint, returning the number of bytes transferred.
    fn write(&mut self, endpoint: &Endpoint, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Read up to `len` bytes from an IN endpoint.
    fn read(&mut self, endpoint: &Endpoint, len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Transport-level device reset.
    fn reset(&mut self) -> Result<()>;
}

/// Opens transports by vendor/product id.
pub trait Connector: Send + Sync {
    /// Transport family this connector reaches devices through.
    fn kind(&self) -> TransportKind;

    /// Open the first matching device, or `None` if nothing matches.
    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Option<Box<dyn Transport>>>;
}

/// Pick the interface and endpoints a profile streams through.
///
/// Bulk profiles prefer a vendor-specific interface with a bulk OUT endpoint and fall back
/// to the first interface exposing one. HID profiles take the first OUT endpoint of any
/// transfer type. The IN endpoint, if any, comes from the same interface.
pub fn select_endpoints(
    interfaces: &[InterfaceInfo],
    kind: TransportKind,
) -> Option<(u8, Endpoint, Option<Endpoint>)> {
    let has_out = |interface: &&InterfaceInfo| -> bool {
        match kind {
            TransportKind::UsbBulk => interface.endpoints.iter().any(Endpoint::is_bulk_out),
            TransportKind::Hid => interface.endpoints.iter().any(Endpoint::is_out),
        }
    };

    let interface = interfaces
        .iter()
        .filter(has_out)
        .find(|i| kind == TransportKind::UsbBulk && i.class_code == VENDOR_SPECIFIC_CLASS)
        .or_else(|| interfaces.iter().find(has_out))?;

    let out = interface.endpoints.iter().copied().find(|e| match kind {
        TransportKind::UsbBulk => e.is_bulk_out(),
        TransportKind::Hid => e.is_out(),
    })?;
    let input = interface.endpoints.iter().copied().find(|e| {
        e.direction == Direction::In
            && (kind == TransportKind::Hid || e.transfer == TransferKind::Bulk)
    });

    Some((interface.number, out, input))
}
