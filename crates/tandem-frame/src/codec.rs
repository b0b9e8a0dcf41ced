use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::flags::ChunkFlags;
use crate::uid::Uid;

/// Raw header: uid (16) + flags (8) + name length (2) + payload length (4) = 30 bytes.
pub const HEADER_SIZE: usize = 30;

/// Digest of the raw header bytes: 16 bytes.
pub const DIGEST_SIZE: usize = 16;

/// Fixed bytes preceding every channel name and payload.
pub const PREFIX_SIZE: usize = HEADER_SIZE + DIGEST_SIZE;

/// Longest channel name the length field can describe.
pub const MAX_CHANNEL_NAME_LEN: usize = u16::MAX as usize;

/// Default maximum payload size per chunk: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default size messages are split into before compression: 32 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Decoded fixed-size part of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub uid: Uid,
    pub flags: ChunkFlags,
    pub channel_name_len: u16,
    pub payload_len: u32,
}

/// One framed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Identity of the message this chunk belongs to.
    pub uid: Uid,
    pub flags: ChunkFlags,
    /// Target channel; absent on acknowledgements.
    pub channel_name: Option<String>,
    /// Payload bytes, compressed when `flags.compression` is non-zero.
    pub payload: Bytes,
}

impl Chunk {
    /// Create a chunk addressed to a channel.
    pub fn new(uid: Uid, flags: ChunkFlags, channel_name: &str, payload: impl Into<Bytes>) -> Self {
        Self {
            uid,
            flags,
            channel_name: Some(channel_name.to_string()),
            payload: payload.into(),
        }
    }

    /// Acknowledgement for `uid`: no channel, no payload.
    pub fn ack(uid: Uid) -> Self {
        Self {
            uid,
            flags: ChunkFlags::acknowledgement(),
            channel_name: None,
            payload: Bytes::new(),
        }
    }

    /// The total wire size of this chunk.
    pub fn wire_size(&self) -> usize {
        PREFIX_SIZE + self.channel_name.as_ref().map_or(0, String::len) + self.payload.len()
    }

    /// Append the wire form of this chunk to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let name = self.channel_name.as_deref();
        let prefix = encode_header(self.uid, name, &self.payload, self.flags)?;
        dst.reserve(self.wire_size());
        dst.put_slice(&prefix);
        if let Some(name) = name {
            dst.put_slice(name.as_bytes());
        }
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// 128-bit integrity digest of the raw header bytes.
pub fn digest(header: &[u8]) -> [u8; DIGEST_SIZE] {
    let hash = blake3::hash(header);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&hash.as_bytes()[..DIGEST_SIZE]);
    out
}

/// Encode the fixed header and its digest.
///
/// Wire format (network byte order):
/// ```text
/// ┌───────────┬────────────┬─────────────┬─────────────┬─────────────┬──────────┬─────────┐
/// │ Uid (16B) │ Flags (8B) │ NameLen(2B) │ PayLen (4B) │ Digest(16B) │ Name     │ Payload │
/// └───────────┴────────────┴─────────────┴─────────────┴─────────────┴──────────┴─────────┘
/// ```
/// Name and payload follow the digest and are not part of the returned bytes.
pub fn encode_header(
    uid: Uid,
    channel_name: Option<&str>,
    payload: &[u8],
    flags: ChunkFlags,
) -> Result<[u8; PREFIX_SIZE]> {
    let flags = flags.encode()?;

    if channel_name.is_some_and(str::is_empty) {
        return Err(FrameError::InvalidChannelName);
    }
    let name_len = channel_name.map_or(0, str::len);
    if name_len > MAX_CHANNEL_NAME_LEN {
        return Err(FrameError::ChannelNameTooLong {
            len: name_len,
            max: MAX_CHANNEL_NAME_LEN,
        });
    }
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }

    let mut out = [0u8; PREFIX_SIZE];
    {
        let mut header = &mut out[..HEADER_SIZE];
        header.put_slice(uid.as_bytes());
        header.put_u64(flags);
        header.put_u16(name_len as u16);
        header.put_u32(payload.len() as u32);
    }
    let check = digest(&out[..HEADER_SIZE]);
    out[HEADER_SIZE..].copy_from_slice(&check);
    Ok(out)
}

/// Decode and verify a header plus digest.
///
/// Returns `FrameError::CorruptFrame` when the digest does not match.
pub fn decode_header(src: &[u8]) -> Result<Header> {
    if src.len() < PREFIX_SIZE {
        return Err(FrameError::IncompleteStream {
            buffered: src.len(),
        });
    }
    let (header, check) = src[..PREFIX_SIZE].split_at(HEADER_SIZE);
    if digest(header) != check {
        return Err(FrameError::CorruptFrame);
    }

    let mut buf = header;
    let mut uid = [0u8; 16];
    buf.copy_to_slice(&mut uid);
    let flags = buf.get_u64();
    let channel_name_len = buf.get_u16();
    let payload_len = buf.get_u32();

    Ok(Header {
        uid: Uid::from_bytes(uid),
        flags: ChunkFlags::decode(flags),
        channel_name_len,
        payload_len,
    })
}

/// Configuration for the chunk codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size per chunk in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Incremental chunk decoder/encoder for `FramedRead` / `FramedWrite`.
///
/// The header is verified as soon as its bytes are buffered; the channel name
/// and payload lengths it declares decide how much more must arrive.
#[derive(Debug, Default)]
pub struct ChunkCodec {
    config: FrameConfig,
    pending: Option<Header>,
}

impl ChunkCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            pending: None,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for ChunkCodec {
    type Item = Chunk;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Chunk>> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < PREFIX_SIZE {
                    src.reserve(PREFIX_SIZE - src.len());
                    return Ok(None); // Need more data
                }
                let header = decode_header(&src[..PREFIX_SIZE])?;
                if header.payload_len as usize > self.config.max_payload_size {
                    return Err(FrameError::PayloadTooLarge {
                        size: header.payload_len as usize,
                        max: self.config.max_payload_size,
                    });
                }
                src.advance(PREFIX_SIZE);
                self.pending = Some(header);
                header
            }
        };

        let name_len = header.channel_name_len as usize;
        let body_len = name_len + header.payload_len as usize;
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None); // Need more data
        }
        self.pending = None;

        let channel_name = if name_len > 0 {
            let raw = src.split_to(name_len);
            let name = std::str::from_utf8(&raw).map_err(|_| FrameError::InvalidChannelName)?;
            Some(name.to_string())
        } else {
            None
        };
        let payload = src.split_to(header.payload_len as usize).freeze();
        trace!(
            uid = %header.uid,
            channel = channel_name.as_deref().unwrap_or("-"),
            len = payload.len(),
            "chunk decoded"
        );

        Ok(Some(Chunk {
            uid: header.uid,
            flags: header.flags,
            channel_name,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Chunk>> {
        match self.decode(src)? {
            Some(chunk) => Ok(Some(chunk)),
            None if src.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(FrameError::IncompleteStream {
                buffered: src.len(),
            }),
        }
    }
}

impl Encoder<Chunk> for ChunkCodec {
    type Error = FrameError;

    fn encode(&mut self, chunk: Chunk, dst: &mut BytesMut) -> Result<()> {
        chunk.encode(dst)
    }
}
