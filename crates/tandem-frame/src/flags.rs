//! Chunk role bits.
//!
//! ```text
//!  bit  7 6 5 4 | 3        | 2        | 1         | 0
//!       level   | recv_ack | send_ack | stop_iter | eom
//! ```

use crate::error::{FrameError, Result};

const EOM: u64 = 1 << 0;
const STOP_ITER: u64 = 1 << 1;
const SEND_ACK: u64 = 1 << 2;
const RECV_ACK: u64 = 1 << 3;
const COMPRESSION_SHIFT: u32 = 4;
const COMPRESSION_MASK: u64 = 0b1111;

/// Highest compression level the flag nibble can carry.
pub const MAX_COMPRESSION_LEVEL: u8 = 15;

/// Describes what a chunk is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChunkFlags {
    /// Last chunk of the message.
    pub eom: bool,
    /// End-of-iteration marker.
    pub stop_iter: bool,
    /// The sender wants an acknowledgement once this chunk arrives.
    pub send_ack: bool,
    /// This chunk is an acknowledgement.
    pub recv_ack: bool,
    /// Compression level of the payload, 0 means uncompressed.
    pub compression: u8,
}

impl ChunkFlags {
    /// Flags for a chunk in the middle of a message.
    pub fn data(compression: u8) -> Self {
        Self {
            compression,
            ..Self::default()
        }
    }

    /// Flags for the closing chunk of a message.
    pub fn end_of_message(send_ack: bool) -> Self {
        Self {
            eom: true,
            send_ack,
            ..Self::default()
        }
    }

    /// Flags for the closing chunk of an iteration.
    pub fn stop_iteration() -> Self {
        Self {
            eom: true,
            stop_iter: true,
            ..Self::default()
        }
    }

    /// Flags for an acknowledgement chunk.
    pub fn acknowledgement() -> Self {
        Self {
            eom: true,
            recv_ack: true,
            ..Self::default()
        }
    }

    /// Whether the payload went through the compressor.
    pub fn is_compressed(&self) -> bool {
        self.compression != 0
    }

    /// Pack into the integer carried by the header.
    pub fn encode(&self) -> Result<u64> {
        if self.compression > MAX_COMPRESSION_LEVEL {
            return Err(FrameError::InvalidFlags {
                level: self.compression,
            });
        }

        let mut bits = u64::from(self.compression) << COMPRESSION_SHIFT;
        if self.eom {
            bits |= EOM;
        }
        if self.stop_iter {
            bits |= STOP_ITER;
        }
        if self.send_ack {
            bits |= SEND_ACK;
        }
        if self.recv_ack {
            bits |= RECV_ACK;
        }
        Ok(bits)
    }

    /// Unpack the header integer. Bits above the compression nibble are ignored.
    pub fn decode(bits: u64) -> Self {
        Self {
            eom: bits & EOM != 0,
            stop_iter: bits & STOP_ITER != 0,
            send_ack: bits & SEND_ACK != 0,
            recv_ack: bits & RECV_ACK != 0,
            compression: ((bits >> COMPRESSION_SHIFT) & COMPRESSION_MASK) as u8,
        }
    }
}
