//! Device profiles and wire headers.
//!
//! Every supported panel is described by an immutable [`DeviceProfile`] value. The
//! differences between vendors (header layout, pixel format, framing) are data on the
//! profile and are interpreted by a handful of pure functions, so each protocol variant
//! can be tested in isolation.
//!
//! ```rust
//! use panelcast::profile::{self, DeviceProfile};
//!
//! let profile = profile::lookup(0x0418, 0x5304, None).unwrap();
//! assert_eq!(profile.header_bytes(480 * 480 * 2), vec![0x69, 0x88, 0xE0, 0x01, 0xE0, 0x01, 0x00, 0x00]);
//! ```

use std::time::Duration;

/// Size of the fixed bulk frame header.
pub const BULK_HEADER_LEN: usize = 64;

const BULK_MAGIC: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
const REPORT_MAGIC: [u8; 4] = [0xDA, 0xDB, 0xDC, 0xDD];

/// Transport family a profile is driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// HID output reports (one report id byte + chunk).
    Hid,
    /// Raw USB bulk OUT endpoint.
    UsbBulk,
}

/// Pixel encoding expected by a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB565, low byte first, row-major.
    Rgb565Le,
    /// RGB565, high byte first, row-major.
    Rgb565Be,
    /// RGB565 low byte first, scanned column by column from the bottom row up, with the
    /// last sample of every column replaced by a two-byte zero separator.
    Rgb565LeColumnScan,
    /// 8-bit luma, one byte per pixel.
    ///
    /// No built-in profile uses it; it is there for monochrome panels described by a
    /// caller-built [`DeviceProfile`].
    Gray8,
    /// Baseline JPEG at the given quality (1-100).
    Jpeg { quality: u8 },
}

impl PixelFormat {
    /// Encoded size for a `width` x `height` raster, if it is fixed.
    pub fn fixed_payload_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb565Le | PixelFormat::Rgb565Be | PixelFormat::Rgb565LeColumnScan => {
                Some(pixels * 2)
            }
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Jpeg { .. } => None,
        }
    }
}

/// Header layout variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `<u8 0x69><u8 0x88><u16 width><u16 height><u16 0>` little-endian.
    Compact,
    /// `DA DB DC DD` + `<u16 cmd><u16 sub><u16 w><u16 h><u16 mode><u16 0><u32 len><u16 0>`.
    Tagged { cmd: u16, sub: u16, mode: u16 },
    /// 64-byte bulk header with magic `12 34 56 78`, mode at 0x38 and length at 0x3C.
    Bulk { cmd: u32, mode: u32 },
}

/// Zero-length packet policy for bulk framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    None,
    /// A failed terminator write is a transport fault.
    Required,
    /// A failed terminator write is logged and ignored.
    BestEffort,
}

/// How encoded frames are cut into transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Header and pixels are concatenated, cut into `chunk_size` slices, zero padded, and
    /// each slice is prefixed with `prefix`.
    Report { prefix: u8 },
    /// Header goes out as its own packet followed by unpadded `chunk_size` slices.
    Bulk { terminator: Terminator },
}

/// Fixed protocol and geometry parameters for one supported hardware variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub transport_kind: TransportKind,
    pub chunk_size: usize,
    pub width: u32,
    pub height: u32,
    pub header: HeaderKind,
    pub pixel_format: PixelFormat,
    pub framing: Framing,
    /// Quiet window after claiming the interface and after end of stream.
    pub settle: Duration,
}

impl DeviceProfile {
    /// Build the frame header announcing a payload of `payload_len` bytes.
    pub fn header_bytes(&self, payload_len: usize) -> Vec<u8> {
        build_header(self.header, self.width, self.height, payload_len)
    }

    /// Header announcing the end of the stream, for profiles that have one.
    pub fn end_of_stream(&self) -> Option<Vec<u8>> {
        match self.header {
            HeaderKind::Bulk { .. } => Some(self.header_bytes(0)),
            HeaderKind::Compact | HeaderKind::Tagged { .. } => None,
        }
    }

    /// Whether this profile matches a vendor/product id pair.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    /// Human readable `vid:pid` tag used in logs.
    pub fn device_tag(&self) -> String {
        format!("{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {}x{})", self.name, self.device_tag(), self.width, self.height)
    }
}

/// Build a header for the given layout.
pub fn build_header(kind: HeaderKind, width: u32, height: u32, payload_len: usize) -> Vec<u8> {
    match kind {
        HeaderKind::Compact => {
            let mut header = Vec::with_capacity(8);
            header.extend_from_slice(&[0x69, 0x88]);
            header.extend_from_slice(&(width as u16).to_le_bytes());
            header.extend_from_slice(&(height as u16).to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes());
            header
        }
        HeaderKind::Tagged { cmd, sub, mode } => {
            let mut header = Vec::with_capacity(22);
            header.extend_from_slice(&REPORT_MAGIC);
            for field in [cmd, sub, width as u16, height as u16, mode, 0] {
                header.extend_from_slice(&field.to_le_bytes());
            }
            header.extend_from_slice(&(payload_len as u32).to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes());
            header
        }
        HeaderKind::Bulk { cmd, mode } => {
            let mut header = vec![0u8; BULK_HEADER_LEN];
            header[0..4].copy_from_slice(&BULK_MAGIC);
            header[4..8].copy_from_slice(&cmd.to_le_bytes());
            header[8..12].copy_from_slice(&width.to_le_bytes());
            header[12..16].copy_from_slice(&height.to_le_bytes());
            header[0x38..0x3C].copy_from_slice(&mode.to_le_bytes());
            header[0x3C..0x40].copy_from_slice(&(payload_len as u32).to_le_bytes());
            header
        }
    }
}

const HID_PROFILE: DeviceProfile = DeviceProfile {
    name: "",
    vendor_id: 0,
    product_id: 0,
    transport_kind: TransportKind::Hid,
    chunk_size: 512,
    width: 480,
    height: 480,
    header: HeaderKind::Compact,
    pixel_format: PixelFormat::Rgb565LeColumnScan,
    framing: Framing::Report { prefix: 0x00 },
    settle: Duration::ZERO,
};

const TAGGED: HeaderKind = HeaderKind::Tagged { cmd: 2, sub: 1, mode: 2 };

/// All profiles this crate can drive, in lookup order.
pub static BUILTIN_PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        name: "hid-320x320",
        vendor_id: 0x0418,
        product_id: 0x5303,
        chunk_size: 64,
        width: 320,
        height: 320,
        ..HID_PROFILE
    },
    DeviceProfile { name: "hid-480x480", vendor_id: 0x0418, product_id: 0x5304, ..HID_PROFILE },
    DeviceProfile {
        name: "hid-480x480-b",
        vendor_id: 0x0416,
        product_id: 0x8001,
        chunk_size: 64,
        header: TAGGED,
        ..HID_PROFILE
    },
    DeviceProfile {
        name: "hid-320x240-b",
        vendor_id: 0x0416,
        product_id: 0x5302,
        width: 320,
        height: 240,
        header: TAGGED,
        ..HID_PROFILE
    },
    DeviceProfile { name: "hid-480x480-w", vendor_id: 0x0402, product_id: 0x3922, ..HID_PROFILE },
    DeviceProfile {
        name: "bulk-320x320",
        vendor_id: 0x87AD,
        product_id: 0x70DB,
        transport_kind: TransportKind::UsbBulk,
        chunk_size: 512,
        width: 320,
        height: 320,
        header: HeaderKind::Bulk { cmd: 3, mode: 2 },
        pixel_format: PixelFormat::Rgb565Be,
        framing: Framing::Bulk { terminator: Terminator::Required },
        settle: Duration::from_secs(2),
    },
    DeviceProfile {
        name: "bulk-480x480-jpeg",
        vendor_id: 0x87AD,
        product_id: 0x70DB,
        transport_kind: TransportKind::UsbBulk,
        chunk_size: 16 * 1024,
        width: 480,
        height: 480,
        header: HeaderKind::Bulk { cmd: 2, mode: 2 },
        pixel_format: PixelFormat::Jpeg { quality: 85 },
        framing: Framing::Bulk { terminator: Terminator::BestEffort },
        settle: Duration::from_secs(2),
    },
];

/// Find the profile for a vendor/product id pair.
///
/// When several variants share the same ids, `variant` selects one by name; without it
/// the first registered variant wins.
pub fn lookup(vendor_id: u16, product_id: u16, variant: Option<&str>) -> Option<&'static DeviceProfile> {
    let mut candidates = BUILTIN_PROFILES.iter().filter(|p| p.matches(vendor_id, product_id));
    match variant {
        Some(name) => candidates.find(|p| p.name == name),
        None => candidates.next(),
    }
}

/// Find a profile by its name.
pub fn by_name(name: &str) -> Option<&'static DeviceProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.name == name)
}
