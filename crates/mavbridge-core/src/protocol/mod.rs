//! Wire Protocol
//!
//! Implements the MAVLink 1.0 frame format: packet framing, the X.25
//! checksum with per-kind seeds, and the schema-driven payload codec.

pub mod checksum;
mod codec;
mod error;
pub mod framing;
mod packet;
mod value;

pub use codec::{Codec, SenderInfo};
pub use error::ProtocolError;
pub use framing::{Frame, FrameCodec};
pub use packet::{Packet, PacketHeader};
pub use value::{TypedMessage, Value};

/// Frame start byte
pub const MAGIC: u8 = 0xFE;

/// Header length including the start byte
pub const HEADER_LEN: usize = 6;

/// Trailing checksum length
pub const CHECKSUM_LEN: usize = 2;

/// Smallest valid frame (empty payload)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// Largest valid frame (255-byte payload)
pub const MAX_FRAME_LEN: usize = HEADER_LEN + u8::MAX as usize + CHECKSUM_LEN;
