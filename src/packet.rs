//! Packetization of encoded frames into fixed-size transfers.
//!
//! [`packetize`] is a pure function of the payload and the profile: report-style profiles
//! get header and pixels concatenated, cut into `chunk_size` slices, zero padded and
//! prefixed; bulk profiles get a standalone header packet, unpadded slices and an optional
//! zero-length terminator.

use crate::profile::{DeviceProfile, Framing, Terminator};

/// Role of a packet within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Prefixed, padded report chunk.
    Report,
    /// Standalone bulk frame header.
    Header,
    /// Bulk payload slice.
    Payload,
    /// Zero-length end-of-frame marker.
    Terminator { best_effort: bool },
}

/// One transfer unit sent over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    kind: PacketKind,
    data: Vec<u8>,
}

impl WirePacket {
    pub fn new(kind: PacketKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Header plus pixel bytes for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub header: Vec<u8>,
    pub pixels: Vec<u8>,
}

impl EncodedPayload {
    /// Build the payload for `pixels`, with a header announcing their length.
    pub fn new(profile: &DeviceProfile, pixels: Vec<u8>) -> Self {
        Self { header: profile.header_bytes(pixels.len()), pixels }
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.pixels.is_empty()
    }
}

/// Split `data` into `chunk_size` slices, zero-pad the last one and prefix each.
pub fn chunk(data: &[u8], chunk_size: usize, prefix: u8) -> Vec<WirePacket> {
    data.chunks(chunk_size)
        .map(|slice| {
            let mut packet = Vec::with_capacity(chunk_size + 1);
            packet.push(prefix);
            packet.extend_from_slice(slice);
            packet.resize(chunk_size + 1, 0);
            WirePacket::new(PacketKind::Report, packet)
        })
        .collect()
}

/// Turn an encoded frame into the profile's sequence of wire packets.
pub fn packetize(payload: &EncodedPayload, profile: &DeviceProfile) -> Vec<WirePacket> {
    match profile.framing {
        Framing::Report { prefix } => {
            let mut joined = Vec::with_capacity(payload.len());
            joined.extend_from_slice(&payload.header);
            joined.extend_from_slice(&payload.pixels);
            chunk(&joined, profile.chunk_size, prefix)
        }
        Framing::Bulk { terminator } => {
            let mut packets = Vec::with_capacity(payload.pixels.len() / profile.chunk_size + 2);
            packets.push(WirePacket::new(PacketKind::Header, payload.header.clone()));
            packets.extend(
                payload
                    .pixels
                    .chunks(profile.chunk_size)
                    .map(|slice| WirePacket::new(PacketKind::Payload, slice.to_vec())),
            );
            if let Some(packet) = terminator_packet(terminator) {
                packets.push(packet);
            }
            packets
        }
    }
}

/// End-of-stream packets for profiles that announce it.
pub fn end_of_stream(profile: &DeviceProfile) -> Vec<WirePacket> {
    let Some(header) = profile.end_of_stream() else {
        return Vec::new();
    };
    let mut packets = vec![WirePacket::new(PacketKind::Header, header)];
    if let Framing::Bulk { terminator } = profile.framing {
        packets.extend(terminator_packet(terminator));
    }
    packets
}

fn terminator_packet(terminator: Terminator) -> Option<WirePacket> {
    match terminator {
        Terminator::None => None,
        Terminator::Required => {
            Some(WirePacket::new(PacketKind::Terminator { best_effort: false }, Vec::new()))
        }
        Terminator::BestEffort => {
            Some(WirePacket::new(PacketKind::Terminator { best_effort: true }, Vec::new()))
        }
    }
}
