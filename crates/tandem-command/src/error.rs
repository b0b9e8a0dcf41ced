use tandem_peer::PeerError;

use crate::protocol::Fqin;

/// Errors that can occur while registering or invoking commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No plugin or command is registered under this name.
    #[error("{0} not found")]
    NotFound(String),

    /// The qualified operation name is not registered. Nothing was sent.
    #[error("unknown operation {0}")]
    UnknownOperation(String),

    /// Parameters do not fit the operation's declared parameters.
    #[error("invalid parameters for {name}: {reason}")]
    InvalidParams { name: String, reason: String },

    /// The name is already taken by a different definition.
    #[error("{0} already registered")]
    AlreadyRegistered(String),

    /// The remote half failed; `trace` is the failure as formatted by the peer.
    #[error("remote failure in {fqin}:\n{trace}")]
    RemoteFailure { fqin: Fqin, trace: String },

    /// The local half failed.
    #[error("local failure in {fqin}:\n{trace}")]
    LocalFailure { fqin: Fqin, trace: String },

    /// The connection or the correlation loop went away before a result arrived.
    #[error("invocation {0} abandoned")]
    AbandonedInvocation(Fqin),

    /// Peer-level error.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;
