use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// Read half of a connection.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected byte-stream pair.
///
/// Every transport produces one of these; the peer layer only ever sees the
/// two halves.
pub struct Connection {
    reader: BoxReader,
    writer: BoxWriter,
    kind: &'static str,
}

impl Connection {
    /// Pair an arbitrary reader and writer.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        kind: &'static str,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            kind,
        }
    }

    /// This process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), "stdio")
    }

    /// A connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: tokio::net::UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, "unix-domain-socket")
    }

    /// Transport name for diagnostics.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Split into the read and write halves.
    pub fn into_split(self) -> (BoxReader, BoxWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("kind", &self.kind).finish()
    }
}
