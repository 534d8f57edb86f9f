//! HID transport over `hidapi`.
//!
//! hidapi owns the interface itself, so configuration, kernel driver detach and interface
//! claim are no-ops here. Every packet goes out as one output report whose first byte is
//! the report id, which is the profile's prefix byte.

use std::sync::Mutex;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::debug;

use super::{Connector, Direction, Endpoint, InterfaceInfo, TransferKind, Transport};
use crate::profile::TransportKind;
use crate::{PanelError, Result};

const HID_CLASS: u8 = 0x03;
const REPORT_OUT: Endpoint =
    Endpoint { address: 0x01, direction: Direction::Out, transfer: TransferKind::Interrupt };
const REPORT_IN: Endpoint =
    Endpoint { address: 0x81, direction: Direction::In, transfer: TransferKind::Interrupt };

/// Opens HID devices by vendor/product id.
pub struct HidConnector {
    api: Mutex<HidApi>,
}

impl HidConnector {
    pub fn new() -> Result<Self> {
        Ok(Self { api: Mutex::new(HidApi::new()?) })
    }
}

impl Connector for HidConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Hid
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Option<Box<dyn Transport>>> {
        let mut api = self.api.lock().map_err(|_| PanelError::transport("hid", "HID API lock poisoned"))?;
        api.refresh_devices()?;

        let present =
            api.device_list().any(|d| d.vendor_id() == vendor_id && d.product_id() == product_id);
        if !present {
            return Ok(None);
        }

        let device = api.open(vendor_id, product_id)?;
        debug!(vendor_id, product_id, "Opened HID device");
        Ok(Some(Box::new(HidTransport { device })))
    }
}

/// An open HID device.
pub struct HidTransport {
    device: HidDevice,
}

impl Transport for HidTransport {
    fn set_active_configuration(&mut self) -> Result<()> {
        Ok(())
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        Ok(vec![InterfaceInfo { number: 0, class_code: HID_CLASS, endpoints: vec![REPORT_IN, REPORT_OUT] }])
    }

    fn kernel_driver_active(&self, _interface: u8) -> Result<bool> {
        Ok(false)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<()> {
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> Result<()> {
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, _endpoint: &Endpoint, data: &[u8], _timeout: Duration) -> Result<usize> {
        Ok(self.device.write(data)?)
    }

    fn read(&mut self, _endpoint: &Endpoint, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let read = self.device.read_timeout(&mut buf, millis)?;
        if read == 0 && !timeout.is_zero() {
            return Err(PanelError::TransportTimeout { duration: timeout });
        }
        buf.truncate(read);
        Ok(buf)
    }

    fn reset(&mut self) -> Result<()> {
        Err(PanelError::transport("reset", "HID devices do not support a transport-level reset"))
    }
}
