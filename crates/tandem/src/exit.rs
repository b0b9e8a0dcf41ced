use std::fmt;
use std::io;

use tandem_command::CommandError;
use tandem_frame::FrameError;
use tandem_peer::PeerError;
use tandem_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const REMOTE_FAILURE: i32 = 70;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::CorruptFrame | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::IncompleteStream { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Json(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PeerError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::Disconnected | PeerError::AckAbandoned(_) | PeerError::ChannelClosed(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn command_error(context: &str, err: CommandError) -> CliError {
    match err {
        CommandError::Peer(err) => peer_error(context, err),
        CommandError::NotFound(_)
        | CommandError::UnknownOperation(_)
        | CommandError::InvalidParams { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        CommandError::RemoteFailure { .. } => {
            CliError::new(REMOTE_FAILURE, format!("{context}: {err}"))
        }
        CommandError::LocalFailure { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        CommandError::AbandonedInvocation(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        CommandError::Json(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use tandem_command::Fqin;
    use tandem_frame::Uid;

    use super::*;

    #[test]
    fn test_command_error_codes() {
        let fqin = Fqin::new("demo:Echo", Uid::new());
        let cases = [
            (CommandError::UnknownOperation("demo:Nope".into()), USAGE),
            (
                CommandError::RemoteFailure {
                    fqin: fqin.clone(),
                    trace: "boom".into(),
                },
                REMOTE_FAILURE,
            ),
            (CommandError::AbandonedInvocation(fqin), TRANSPORT_ERROR),
            (CommandError::Peer(PeerError::Disconnected), TRANSPORT_ERROR),
            (
                CommandError::Peer(PeerError::Frame(FrameError::CorruptFrame)),
                DATA_INVALID,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(command_error("call", err).code, code);
        }
    }
}
