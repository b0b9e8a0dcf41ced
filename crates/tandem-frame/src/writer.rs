use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::codec::{Chunk, ChunkCodec, FrameConfig};
use crate::error::Result;

/// Writes complete chunks to any `AsyncWrite` stream.
pub struct ChunkWriter<W> {
    inner: FramedWrite<W, ChunkCodec>,
}

impl<W: AsyncWrite + Unpin> ChunkWriter<W> {
    /// Create a new chunk writer with default configuration.
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self {
            inner: FramedWrite::new(inner, ChunkCodec::new(config)),
        }
    }

    /// Write one chunk and flush it to the stream.
    pub async fn write_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.inner.send(chunk).await
    }

    /// Flush and shut down the write half.
    pub async fn close(&mut self) -> Result<()> {
        SinkExt::close(&mut self.inner).await
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ChunkFlags;
    use crate::reader::ChunkReader;
    use crate::uid::Uid;

    #[tokio::test]
    async fn test_write_then_read() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = ChunkWriter::new(client);
        let mut reader = ChunkReader::new(server);

        let uid = Uid::new();
        let chunks = vec![
            Chunk::new(uid, ChunkFlags::data(0), "chan", &b"abc"[..]),
            Chunk::new(uid, ChunkFlags::end_of_message(true), "chan", &b""[..]),
            Chunk::ack(uid),
        ];
        for chunk in chunks.clone() {
            writer.write_chunk(chunk).await.unwrap();
        }
        writer.close().await.unwrap();

        for expected in chunks {
            assert_eq!(reader.read_chunk().await.unwrap(), Some(expected));
        }
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_flags_rejected_on_write() {
        let mut writer = ChunkWriter::new(tokio::io::sink());
        let chunk = Chunk::new(Uid::new(), ChunkFlags::data(20), "chan", &b"x"[..]);
        assert!(writer.write_chunk(chunk).await.is_err());
    }
}
