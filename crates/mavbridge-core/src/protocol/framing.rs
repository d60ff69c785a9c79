//! Stream framing
//!
//! Splits a continuous byte stream (serial line, TCP) into frames. Invalid
//! frames are reported as items rather than stream errors so a reader keeps
//! going: after a checksum failure one byte is skipped and the buffer is
//! rescanned for the next start byte. Frames of an unregistered kind are
//! only passed on when they line up with the next start byte.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use super::{Codec, Packet, ProtocolError, CHECKSUM_LEN, HEADER_LEN, MAGIC};

/// A validated packet together with the bytes it was decoded from
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded packet
    pub packet: Packet,
    /// Original frame bytes, for raw fan-out
    pub raw: Vec<u8>,
}

/// Decoder/encoder for a framed byte stream
#[derive(Debug, Clone)]
pub struct FrameCodec {
    codec: Arc<Codec>,
}

impl FrameCodec {
    /// Create a stream codec over a packet codec
    pub fn new(codec: Arc<Codec>) -> Self {
        Self { codec }
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, ProtocolError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Drop anything before the next start byte
            match src.iter().position(|&b| b == MAGIC) {
                None => {
                    if !src.is_empty() {
                        tracing::trace!(bytes = src.len(), "Discarding bytes without start marker");
                    }
                    src.clear();
                    return Ok(None);
                }
                Some(skip) if skip > 0 => {
                    tracing::trace!(bytes = skip, "Skipping to start marker");
                    src.advance(skip);
                }
                Some(_) => {}
            }

            if src.len() < 2 {
                return Ok(None);
            }
            let total = HEADER_LEN + src[1] as usize + CHECKSUM_LEN;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            match self.codec.decode(&src[..total]) {
                Ok(packet) => {
                    let raw = src.split_to(total).to_vec();
                    return Ok(Some(Ok(Frame { packet, raw })));
                }
                Err(err @ ProtocolError::UnknownKind(_)) => {
                    // Without a seed the checksum cannot be verified, so the
                    // frame is only trusted when another frame starts right
                    // after it or the buffer ends with it
                    if src.len() == total || src[total] == MAGIC {
                        src.advance(total);
                        return Ok(Some(Err(err)));
                    }
                    tracing::trace!("Start byte of unknown kind not followed by a frame, skipping");
                    src.advance(1);
                }
                Err(err) => {
                    src.advance(1);
                    return Ok(Some(Err(err)));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(item) = self.decode(src)? {
                return Ok(Some(item));
            }
            if src.is_empty() {
                return Ok(None);
            }
            // A frame cut short by the end of input; rescan past its start byte
            src.advance(1);
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&packet.to_bytes());
        Ok(())
    }
}
