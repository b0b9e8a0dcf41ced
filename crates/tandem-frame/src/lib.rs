//! Checksummed chunk framing for tandem channels.
//!
//! Every chunk on the wire carries:
//! - A 16-byte message uid (UUIDv7, big-endian)
//! - An 8-byte flag word (end-of-message, stop-iteration, ack bits, compression level)
//! - 2-byte channel name and 4-byte payload lengths
//! - A 16-byte digest of those header bytes
//!
//! followed by the channel name and the payload. A digest mismatch is fatal to
//! the stream.

pub mod codec;
pub mod compress;
pub mod error;
pub mod flags;
pub mod reader;
pub mod uid;
pub mod writer;

pub use codec::{
    decode_header, encode_header, Chunk, ChunkCodec, FrameConfig, Header, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_PAYLOAD, DIGEST_SIZE, HEADER_SIZE, MAX_CHANNEL_NAME_LEN, PREFIX_SIZE,
};
pub use compress::{compress, decompress};
pub use error::{FrameError, Result};
pub use flags::{ChunkFlags, MAX_COMPRESSION_LEVEL};
pub use reader::ChunkReader;
pub use uid::Uid;
pub use writer::ChunkWriter;
