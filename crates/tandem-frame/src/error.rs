/// Errors that can occur during chunk encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header digest does not match the header bytes.
    ///
    /// The stream offset can no longer be trusted, so this is fatal to the connection.
    #[error("corrupt frame (header digest mismatch)")]
    CorruptFrame,

    /// The compression level does not fit the 4-bit flag nibble.
    #[error("invalid chunk flags (compression level {level}, max 15)")]
    InvalidFlags { level: u8 },

    /// The channel name does not fit the 2-byte length field.
    #[error("channel name too long ({len} bytes, max {max})")]
    ChannelNameTooLong { len: usize, max: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The channel name is empty, or its bytes on the wire are not UTF-8.
    #[error("channel name is empty or not valid UTF-8")]
    InvalidChannelName,

    /// The stream ended in the middle of a chunk.
    #[error("stream ended mid-frame ({buffered} bytes buffered)")]
    IncompleteStream { buffered: usize },

    /// Compressing or decompressing a chunk payload failed.
    #[error("chunk compression error: {0}")]
    Compression(std::io::Error),

    /// An I/O error occurred while reading or writing chunks.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the error means the peer went away rather than the protocol broke.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::IncompleteStream { .. } => true,
            FrameError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
