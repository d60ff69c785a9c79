//! Packet framing
//!
//! Frame layout (MAVLink 1.0):
//! - 1 byte: Magic (0xFE)
//! - 1 byte: Payload length
//! - 1 byte: Sequence number
//! - 1 byte: Sender system id
//! - 1 byte: Sender component id
//! - 1 byte: Message kind id
//! - N bytes: Payload
//! - 2 bytes: X.25 checksum (little-endian) over length..payload plus the
//!   per-kind seed byte

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::{CHECKSUM_LEN, HEADER_LEN, MAGIC};

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketHeader {
    /// Declared payload length
    pub len: u8,
    /// Sender sequence number
    pub seq: u8,
    /// Sender system id
    pub system_id: u8,
    /// Sender component id
    pub component_id: u8,
    /// Message kind id
    pub kind: u8,
}

impl PacketHeader {
    /// Parse the header from the first [`HEADER_LEN`] bytes of a frame
    pub(crate) fn from_frame(data: &[u8]) -> Self {
        Self {
            len: data[1],
            seq: data[2],
            system_id: data[3],
            component_id: data[4],
            kind: data[5],
        }
    }
}

/// One framed unit of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    /// Frame header
    pub header: PacketHeader,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Trailing checksum
    pub checksum: u16,
}

impl Packet {
    /// Bytes covered by the checksum, excluding the seed
    pub fn checksum_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN - 1 + self.payload.len());
        body.push(self.header.len);
        body.push(self.header.seq);
        body.push(self.header.system_id);
        body.push(self.header.component_id);
        body.push(self.header.kind);
        body.extend_from_slice(&self.payload);
        body
    }

    /// Serialize exactly as stored, without recomputing anything
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.push(MAGIC);
        bytes.extend_from_slice(&self.checksum_body());

        let mut crc_bytes = [0u8; CHECKSUM_LEN];
        LittleEndian::write_u16(&mut crc_bytes, self.checksum);
        bytes.extend_from_slice(&crc_bytes);

        bytes
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.payload.len() + CHECKSUM_LEN
    }
}
