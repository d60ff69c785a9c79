//! X.25 (CRC-16/MCRF4XX) running checksum used by the wire format.

use crc::{Crc, Digest, CRC_16_MCRF4XX};

static MCRF4XX: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// Running X.25 accumulator.
pub struct X25 {
    digest: Digest<'static, u16>,
}

impl X25 {
    /// Create an accumulator seeded with 0xFFFF
    pub fn new() -> Self {
        Self {
            digest: MCRF4XX.digest(),
        }
    }

    /// Mix one byte into the accumulator
    pub fn update_byte(&mut self, byte: u8) {
        self.digest.update(&[byte]);
    }

    /// Mix a byte slice into the accumulator
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Final accumulator value
    pub fn finish(self) -> u16 {
        self.digest.finalize()
    }
}

impl Default for X25 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a frame body (everything after the magic byte, before the
/// trailing checksum) finished with the per-kind seed byte.
pub fn frame_checksum(body: &[u8], seed: u8) -> u16 {
    let mut crc = X25::new();
    crc.update(body);
    crc.update_byte(seed);
    crc.finish()
}
