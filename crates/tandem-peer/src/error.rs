use tandem_frame::{FrameError, Uid};

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel's inbound queue was closed because the connection ended.
    #[error("channel {0} closed")]
    ChannelClosed(String),

    /// An end-of-iteration marker arrived where a message was expected.
    #[error("iteration on channel {0} ended")]
    EndOfIteration(String),

    /// The connection is gone; nothing more can be queued.
    #[error("peer disconnected")]
    Disconnected,

    /// The connection ended before the acknowledgement for this message arrived.
    #[error("acknowledgement for {0} abandoned")]
    AckAbandoned(Uid),

    /// The outbound queue is already being drained by a pump.
    #[error("pump already started for these queues")]
    PumpAlreadyStarted,

    /// Configuration rejected by validation.
    #[error("invalid peer configuration: {0}")]
    InvalidConfig(String),

    /// A pump task panicked or was aborted.
    #[error("pump task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
