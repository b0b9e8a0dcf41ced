use tandem_frame::{FrameConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PAYLOAD, MAX_COMPRESSION_LEVEL};

use crate::error::{PeerError, Result};

/// Default compression level for outgoing chunks.
pub const DEFAULT_COMPRESSION: u8 = 6;

/// Default cap on one reassembled message: 256 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 256 * 1024 * 1024;

/// Per-connection settings shared by every channel on one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Size serialized messages are split into before compression. Default: 32 KiB.
    pub chunk_size: usize,
    /// Compression level for outgoing chunks, 0 disables compression. Default: 6.
    pub compression: u8,
    /// Largest chunk payload accepted from the peer. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Largest message, after decompression and reassembly, accepted from the
    /// peer. Default: 256 MiB.
    pub max_message_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: DEFAULT_COMPRESSION,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_message_size: DEFAULT_MAX_MESSAGE,
        }
    }
}

impl PeerConfig {
    /// Check the settings before any connection uses them.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PeerError::InvalidConfig("chunk size must be at least 1".into()));
        }
        if self.chunk_size > self.max_payload_size {
            return Err(PeerError::InvalidConfig(format!(
                "chunk size {} exceeds max payload size {}",
                self.chunk_size, self.max_payload_size
            )));
        }
        if self.max_message_size < self.chunk_size {
            return Err(PeerError::InvalidConfig(format!(
                "max message size {} is below chunk size {}",
                self.max_message_size, self.chunk_size
            )));
        }
        if self.compression > MAX_COMPRESSION_LEVEL {
            return Err(PeerError::InvalidConfig(format!(
                "compression level {} out of range (0-{MAX_COMPRESSION_LEVEL})",
                self.compression
            )));
        }
        Ok(())
    }

    /// Decoder settings derived from this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

/// Options for a single send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Wait for the peer to acknowledge delivery.
    pub ack: bool,
    /// Override the connection's compression level for this message.
    pub compression: Option<u8>,
}

impl SendOptions {
    /// Request an acknowledgement.
    pub fn acked() -> Self {
        Self {
            ack: true,
            compression: None,
        }
    }

    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression = Some(level);
        self
    }
}
