use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::{Chunk, ChunkCodec, FrameConfig};
use crate::error::Result;

/// Reads complete chunks from any `AsyncRead` stream.
///
/// Partial reads are buffered inside the codec; callers always get whole chunks.
pub struct ChunkReader<R> {
    inner: FramedRead<R, ChunkCodec>,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Create a new chunk reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new chunk reader with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner: FramedRead::new(inner, ChunkCodec::new(config)),
        }
    }

    /// Read the next complete chunk.
    ///
    /// Returns `Ok(None)` on a clean end of stream and
    /// `Err(FrameError::IncompleteStream)` if the stream ended mid-chunk.
    pub async fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        self.inner.next().await.transpose()
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        self.inner.decoder().config()
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::error::FrameError;
    use crate::flags::ChunkFlags;
    use crate::uid::Uid;

    fn wire(chunks: &[Chunk]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for chunk in chunks {
            chunk.encode(&mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_read_chunks_then_eof() {
        let first = Chunk::new(Uid::new(), ChunkFlags::data(0), "a", &b"one"[..]);
        let second = Chunk::new(first.uid, ChunkFlags::end_of_message(true), "a", &b""[..]);
        let bytes = wire(&[first.clone(), second.clone()]);

        let mut reader = ChunkReader::new(&bytes[..]);
        assert_eq!(reader.read_chunk().await.unwrap(), Some(first));
        assert_eq!(reader.read_chunk().await.unwrap(), Some(second));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_across_partial_writes() {
        let chunk = Chunk::new(Uid::new(), ChunkFlags::data(0), "slow", vec![7u8; 300]);
        let bytes = wire(&[chunk.clone()]);
        let (client, server) = tokio::io::duplex(16);

        let writer = tokio::spawn(async move {
            let mut client = client;
            for piece in bytes.chunks(5) {
                client.write_all(piece).await.unwrap();
            }
        });

        let mut reader = ChunkReader::new(server);
        assert_eq!(reader.read_chunk().await.unwrap(), Some(chunk));
        writer.await.unwrap();
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_incomplete() {
        let chunk = Chunk::new(Uid::new(), ChunkFlags::data(0), "c", &b"payload"[..]);
        let mut bytes = wire(&[chunk]);
        bytes.truncate(bytes.len() - 2);

        let mut reader = ChunkReader::new(&bytes[..]);
        let err = reader.read_chunk().await.unwrap_err();
        assert!(matches!(err, FrameError::IncompleteStream { .. }));
        assert!(err.is_disconnect());
    }
}
