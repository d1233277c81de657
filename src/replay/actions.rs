//! Cursor action stream
//!
//! The compressed blob is an LZMA "alone" stream whose plaintext is a
//! comma-separated list of `w|x|y|z` records:
//!
//! - `w` time delta in ms since the previous record (i64)
//! - `x`, `y` cursor position in playfield pixels (f32)
//! - `z` key/button bitmask (i32)
//!
//! Records whose first field is negative carry the RNG seed or other
//! metadata and are not frames.

use super::Frame;
use lzma_rs::decompress::Options;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{trace, warn};

/// Plaintext allowed per compressed byte
const MAX_EXPANSION: usize = 64;
const MIN_OUTPUT_LIMIT: usize = 1 << 20;
/// Far above the action text of any real play
const MAX_OUTPUT_LIMIT: usize = 64 << 20;

/// Why a single action record was not turned into a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty record")]
    Empty,

    #[error("seed or metadata record")]
    Metadata,

    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),

    #[error("field {0} is not a number")]
    InvalidField(&'static str),
}

/// Decompress and parse an action blob.
///
/// Never fails: an undecodable blob, or one that inflates past
/// [`output_limit`], yields no frames; malformed records are skipped.
pub fn decode(compressed: &[u8]) -> Vec<Frame> {
    if compressed.is_empty() {
        return Vec::new();
    }
    match decompress(compressed) {
        Ok(text) => parse_actions(&text),
        Err(e) => {
            warn!(bytes = compressed.len(), "action data could not be decompressed: {}", e);
            Vec::new()
        }
    }
}

/// Most plaintext a blob of `compressed_len` bytes may inflate to
pub fn output_limit(compressed_len: usize) -> usize {
    compressed_len
        .saturating_mul(MAX_EXPANSION)
        .clamp(MIN_OUTPUT_LIMIT, MAX_OUTPUT_LIMIT)
}

/// Inflate an LZMA action blob into its text form
pub fn decompress(compressed: &[u8]) -> Result<String, lzma_rs::error::Error> {
    decompress_with_limit(compressed, output_limit(compressed.len()))
}

/// Inflate at most `limit` bytes; a larger stream is an error
pub fn decompress_with_limit(compressed: &[u8], limit: usize) -> Result<String, lzma_rs::error::Error> {
    let mut input = compressed;
    let mut out = BoundedWriter {
        buf: Vec::with_capacity(compressed.len().saturating_mul(4).min(limit)),
        limit,
    };
    let options = Options {
        memlimit: Some(limit),
        ..Options::default()
    };
    lzma_rs::lzma_decompress_with_options(&mut input, &mut out, &options)?;
    Ok(String::from_utf8(out.buf)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

/// `Vec` sink that refuses to grow past `limit`
struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len().saturating_add(data.len()) > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("action data inflates past {} bytes", self.limit),
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Parse action text, keeping the well-formed frame records in order
pub fn parse_actions(text: &str) -> Vec<Frame> {
    let mut skipped = 0usize;
    let frames: Vec<Frame> = text
        .split(',')
        .filter_map(|token| match parse_record(token) {
            Ok(frame) => Some(frame),
            Err(FrameError::Empty) => None,
            Err(e) => {
                skipped += 1;
                trace!(token, "skipping action record: {}", e);
                None
            }
        })
        .collect();

    if skipped > 0 {
        trace!(frames = frames.len(), skipped, "parsed action stream");
    }
    frames
}

/// Parse one `w|x|y|z` record
pub fn parse_record(token: &str) -> Result<Frame, FrameError> {
    if token.is_empty() {
        return Err(FrameError::Empty);
    }
    if token.starts_with('-') {
        return Err(FrameError::Metadata);
    }

    let fields: Vec<&str> = token.split('|').collect();
    let &[w, x, y, z] = fields.as_slice() else {
        return Err(FrameError::FieldCount(fields.len()));
    };

    Ok(Frame {
        time_delta: w.parse().map_err(|_| FrameError::InvalidField("w"))?,
        x: x.parse().map_err(|_| FrameError::InvalidField("x"))?,
        y: y.parse().map_err(|_| FrameError::InvalidField("y"))?,
        keys: z.parse().map_err(|_| FrameError::InvalidField("z"))?,
    })
}

/// Render frames as action text
pub fn format_actions(frames: &[Frame]) -> String {
    frames
        .iter()
        .map(|f| format!("{}|{}|{}|{}", f.time_delta, f.x, f.y, f.keys))
        .collect::<Vec<_>>()
        .join(",")
}

/// LZMA-compress action text
pub fn compress(text: &str) -> io::Result<Vec<u8>> {
    let mut input = text.as_bytes();
    let mut out = Vec::new();
    lzma_rs::lzma_compress(&mut input, &mut out)?;
    Ok(out)
}

/// Produce a blob that `decode` turns back into `frames`
pub fn encode(frames: &[Frame]) -> io::Result<Vec<u8>> {
    compress(&format_actions(frames))
}
