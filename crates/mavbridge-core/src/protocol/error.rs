//! Protocol errors

use thiserror::Error;

use super::Packet;

/// Errors that can occur while framing, decoding or encoding packets
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },

    #[error("Truncated packet: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown message kind {}", .0.header.kind)]
    UnknownKind(Box<Packet>),

    #[error("Payload underrun for kind {kind}: need {needed} bytes, have {available}")]
    Underrun {
        kind: u8,
        needed: usize,
        available: usize,
    },

    #[error("Invalid start byte {0:#04x}")]
    BadMagic(u8),

    #[error("Unknown message name: {0}")]
    UnknownMessage(String),

    #[error("Field {field} cannot hold {value}")]
    InvalidValue { field: String, value: String },

    #[error("Outbound link closed")]
    LinkClosed,

    #[error("Outbound link busy")]
    LinkBusy,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// The raw packet carried by an unknown-kind error, if any
    pub fn into_unknown_packet(self) -> Option<Packet> {
        match self {
            ProtocolError::UnknownKind(packet) => Some(*packet),
            _ => None,
        }
    }
}
