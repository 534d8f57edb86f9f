//! Raw USB transport over libusb (`rusb`).

use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};
use tracing::debug;

use super::{Connector, Direction, Endpoint, InterfaceInfo, TransferKind, Transport};
use crate::profile::TransportKind;
use crate::{PanelError, Result};

/// Opens devices by vendor/product id through a libusb context.
pub struct UsbConnector {
    context: Context,
}

impl UsbConnector {
    pub fn new() -> Result<Self> {
        Ok(Self { context: Context::new()? })
    }
}

impl Connector for UsbConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::UsbBulk
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Option<Box<dyn Transport>>> {
        match self.context.open_device_with_vid_pid(vendor_id, product_id) {
            Some(handle) => {
                debug!(vendor_id, product_id, "Opened USB device");
                Ok(Some(Box::new(UsbTransport { handle })))
            }
            None => Ok(None),
        }
    }
}

/// An open libusb device handle.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
}

fn map_transfer_error(err: rusb::Error, timeout: Duration) -> PanelError {
    match err {
        rusb::Error::Timeout => PanelError::TransportTimeout { duration: timeout },
        other => PanelError::transport("usb transfer", other),
    }
}

impl Transport for UsbTransport {
    fn set_active_configuration(&mut self) -> Result<()> {
        let wanted = self.handle.device().config_descriptor(0)?.number();
        match self.handle.active_configuration() {
            Ok(active) if active == wanted => Ok(()),
            _ => self
                .handle
                .set_active_configuration(wanted)
                .map_err(|e| PanelError::transport("set_configuration", e)),
        }
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let config = self.handle.device().active_config_descriptor()?;
        let mut interfaces = Vec::new();

        for interface in config.interfaces() {
            // Alternate setting 0 only.
            let Some(descriptor) = interface.descriptors().next() else { continue };
            let endpoints = descriptor
                .endpoint_descriptors()
                .map(|endpoint| Endpoint {
                    address: endpoint.address(),
                    direction: match endpoint.direction() {
                        rusb::Direction::In => Direction::In,
                        rusb::Direction::Out => Direction::Out,
                    },
                    transfer: match endpoint.transfer_type() {
                        rusb::TransferType::Control => TransferKind::Control,
                        rusb::TransferType::Isochronous => TransferKind::Isochronous,
                        rusb::TransferType::Bulk => TransferKind::Bulk,
                        rusb::TransferType::Interrupt => TransferKind::Interrupt,
                    },
                })
                .collect();
            interfaces.push(InterfaceInfo {
                number: descriptor.interface_number(),
                class_code: descriptor.class_code(),
                endpoints,
            });
        }
        Ok(interfaces)
    }

    fn kernel_driver_active(&self, interface: u8) -> Result<bool> {
        match self.handle.kernel_driver_active(interface) {
            Ok(active) => Ok(active),
            // Platforms without kernel driver detach support.
            Err(rusb::Error::NotSupported) => Ok(false),
            Err(e) => Err(PanelError::transport("kernel_driver_active", e)),
        }
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        self.handle
            .detach_kernel_driver(interface)
            .map_err(|e| PanelError::transport("detach_kernel_driver", e))
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        self.handle.claim_interface(interface).map_err(|e| PanelError::transport("claim_interface", e))
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        self.handle
            .release_interface(interface)
            .map_err(|e| PanelError::transport("release_interface", e))
    }

    fn write(&mut self, endpoint: &Endpoint, data: &[u8], timeout: Duration) -> Result<usize> {
        let written = match endpoint.transfer {
            TransferKind::Bulk => self.handle.write_bulk(endpoint.address, data, timeout),
            TransferKind::Interrupt => self.handle.write_interrupt(endpoint.address, data, timeout),
            other => {
                return Err(PanelError::transport(
                    "write",
                    format!("unsupported transfer type {other:?} on endpoint {:#04x}", endpoint.address),
                ));
            }
        };
        written.map_err(|e| map_transfer_error(e, timeout))
    }

    fn read(&mut self, endpoint: &Endpoint, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let read = match endpoint.transfer {
            TransferKind::Bulk => self.handle.read_bulk(endpoint.address, &mut buf, timeout),
            TransferKind::Interrupt => self.handle.read_interrupt(endpoint.address, &mut buf, timeout),
            other => {
                return Err(PanelError::transport(
                    "read",
                    format!("unsupported transfer type {other:?} on endpoint {:#04x}", endpoint.address),
                ));
            }
        }
        .map_err(|e| map_transfer_error(e, timeout))?;
        buf.truncate(read);
        Ok(buf)
    }

    fn reset(&mut self) -> Result<()> {
        self.handle.reset().map_err(|e| PanelError::transport("reset", e))
    }
}
