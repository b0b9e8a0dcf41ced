//! Per-chunk payload compression.
//!
//! Every chunk is compressed on its own so the receiver can inflate it as soon as
//! it arrives. The flag nibble is handed to zstd as its level.

use std::io::Read;

use tracing::debug;

use crate::error::{FrameError, Result};
use crate::flags::MAX_COMPRESSION_LEVEL;

/// Compress one chunk payload at `level` (1-15).
pub fn compress(data: &[u8], level: u8) -> Result<Vec<u8>> {
    if level == 0 || level > MAX_COMPRESSION_LEVEL {
        return Err(FrameError::InvalidFlags { level });
    }
    zstd::bulk::compress(data, i32::from(level)).map_err(FrameError::Compression)
}

/// Inflate one chunk payload, refusing to produce more than `limit` bytes.
///
/// The output is read through a bounded window, so a small payload that expands
/// enormously is rejected after `limit + 1` bytes instead of being inflated whole.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(data).map_err(FrameError::Compression)?;
    let window = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::with_capacity(data.len().min(limit));
    decoder
        .take(window)
        .read_to_end(&mut out)
        .map_err(FrameError::Compression)?;
    if out.len() > limit {
        debug!(compressed = data.len(), limit, "chunk inflates past the limit");
        return Err(FrameError::PayloadTooLarge {
            size: out.len(),
            max: limit,
        });
    }
    Ok(out)
}
