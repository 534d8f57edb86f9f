//! Test utilities: an in-memory transport and fixture helpers.
//!
//! [`MockConnector`] hands out [`MockTransport`] handles that all share one
//! [`MockDevice`] state, so a test can keep inspecting writes, claims and releases after
//! the session has taken ownership of the transport.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use image::{Rgba, RgbaImage};

use crate::profile::TransportKind;
use crate::transport::{
    Connector, Direction, Endpoint, InterfaceInfo, TransferKind, Transport, VENDOR_SPECIFIC_CLASS,
};
use crate::{PanelError, Result};

/// Scripted outcome of a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Complete,
    Short(usize),
    Timeout,
}

/// Observable state of a mock device.
#[derive(Debug, Default)]
pub struct MockDevice {
    pub present: bool,
    pub interfaces: Vec<InterfaceInfo>,
    pub kernel_driver_bound: bool,
    pub detached: u32,
    pub claimed: Vec<u8>,
    pub claims: u32,
    pub releases: u32,
    pub resets: u32,
    pub fail_reset: bool,
    /// Present, but opening it fails (e.g. permission denied).
    pub fail_open: bool,
    pub opens: u32,
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Consumed front to back; once empty every write completes.
    pub script: VecDeque<WriteOutcome>,
    /// Outcome for every write when the script is empty.
    pub default_outcome: Option<WriteOutcome>,
    pub responses: VecDeque<Vec<u8>>,
}

impl MockDevice {
    /// Total bytes written, terminators included.
    pub fn bytes_written(&self) -> usize {
        self.writes.iter().map(|(_, data)| data.len()).sum()
    }
}

/// Shared handle to a mock device.
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockDevice>>);

impl MockHandle {
    /// A present device with a vendor-specific bulk interface (OUT 0x01, IN 0x81).
    pub fn bulk() -> Self {
        Self::with_interfaces(vec![InterfaceInfo {
            number: 0,
            class_code: VENDOR_SPECIFIC_CLASS,
            endpoints: vec![
                Endpoint { address: 0x81, direction: Direction::In, transfer: TransferKind::Bulk },
                Endpoint { address: 0x01, direction: Direction::Out, transfer: TransferKind::Bulk },
            ],
        }])
    }

    /// A present HID-style device (interrupt OUT 0x02).
    pub fn hid() -> Self {
        Self::with_interfaces(vec![InterfaceInfo {
            number: 0,
            class_code: 0x03,
            endpoints: vec![Endpoint {
                address: 0x02,
                direction: Direction::Out,
                transfer: TransferKind::Interrupt,
            }],
        }])
    }

    pub fn with_interfaces(interfaces: Vec<InterfaceInfo>) -> Self {
        Self(Arc::new(Mutex::new(MockDevice { present: true, interfaces, ..Default::default() })))
    }

    pub fn lock(&self) -> MutexGuard<'_, MockDevice> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Connector that opens [`MockTransport`]s on a shared [`MockHandle`].
pub struct MockConnector {
    kind: TransportKind,
    vendor_id: u16,
    product_id: u16,
    device: MockHandle,
}

impl MockConnector {
    pub fn new(kind: TransportKind, vendor_id: u16, product_id: u16, device: MockHandle) -> Self {
        Self { kind, vendor_id, product_id, device }
    }
}

impl Connector for MockConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Option<Box<dyn Transport>>> {
        let mut device = self.device.lock();
        if !device.present || vendor_id != self.vendor_id || product_id != self.product_id {
            return Ok(None);
        }
        if device.fail_open {
            return Err(PanelError::transport("open", "mock permission denied"));
        }
        device.opens += 1;
        Ok(Some(Box::new(MockTransport { device: self.device.clone() })))
    }
}

/// In-memory transport recording every call on its [`MockHandle`].
pub struct MockTransport {
    device: MockHandle,
}

impl Transport for MockTransport {
    fn set_active_configuration(&mut self) -> Result<()> {
        Ok(())
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        Ok(self.device.lock().interfaces.clone())
    }

    fn kernel_driver_active(&self, _interface: u8) -> Result<bool> {
        Ok(self.device.lock().kernel_driver_bound)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<()> {
        let mut device = self.device.lock();
        device.kernel_driver_bound = false;
        device.detached += 1;
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        let mut device = self.device.lock();
        device.claimed.push(interface);
        device.claims += 1;
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        let mut device = self.device.lock();
        device.claimed.retain(|&i| i != interface);
        device.releases += 1;
        Ok(())
    }

    fn write(&mut self, endpoint: &Endpoint, data: &[u8], timeout: Duration) -> Result<usize> {
        let mut device = self.device.lock();
        let outcome = device
            .script
            .pop_front()
            .or(device.default_outcome)
            .unwrap_or(WriteOutcome::Complete);
        match outcome {
            WriteOutcome::Complete => {
                device.writes.push((endpoint.address, data.to_vec()));
                Ok(data.len())
            }
            WriteOutcome::Short(n) => Ok(n.min(data.len())),
            WriteOutcome::Timeout => Err(PanelError::TransportTimeout { duration: timeout }),
        }
    }

    fn read(&mut self, _endpoint: &Endpoint, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut response = self
            .device
            .lock()
            .responses
            .pop_front()
            .ok_or(PanelError::TransportTimeout { duration: timeout })?;
        response.truncate(len);
        Ok(response)
    }

    fn reset(&mut self) -> Result<()> {
        let mut device = self.device.lock();
        device.resets += 1;
        if device.fail_reset {
            return Err(PanelError::transport("reset", "mock reset failure"));
        }
        Ok(())
    }
}

/// Write a solid-colour PNG fixture.
pub fn write_png(path: &Path, width: u32, height: u32, color: [u8; 4]) {
    RgbaImage::from_pixel(width, height, Rgba(color)).save(path).expect("write png fixture");
}
