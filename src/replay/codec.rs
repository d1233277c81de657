//! `.osr` container decoding and encoding
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ u8   game mode                               │
//! │ i32  game version                            │
//! │ str  beatmap MD5                             │
//! │ str  player name                             │
//! │ str  replay MD5                              │
//! │ i16  300 / 100 / 50 / geki / katu / miss     │
//! │ i32  total score                             │
//! │ i16  max combo                               │
//! │ u8   perfect combo                           │
//! │ u32  mods bitmask                            │
//! │ str  life bar graph                          │
//! │ i64  timestamp (.NET ticks)                  │
//! │ i32  compressed length N                     │
//! │ [N]  LZMA action data                        │
//! │ i64  online score id                         │
//! └──────────────────────────────────────────────┘
//! ```

use super::actions;
use super::binary::{BinaryReader, BinaryWriter};
use super::{GameMode, HitCounts, Replay};
use std::io;
use thiserror::Error;

/// Structural failure while decoding a replay container
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("replay truncated at byte {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("invalid string marker 0x{marker:02x} at byte {offset}")]
    InvalidStringMarker { offset: usize, marker: u8 },

    #[error("compressed data length {declared} exceeds the {remaining} bytes left")]
    BlobOverrun { declared: usize, remaining: usize },

    #[error("negative compressed data length {0}")]
    NegativeBlobLength(i32),

    #[error("ULEB128 value at byte {offset} does not fit in 64 bits")]
    UlebOverflow { offset: usize },

    #[error("unknown game mode {0}")]
    UnknownGameMode(u8),
}

/// Decode a complete replay file.
///
/// The action stream is decompressed eagerly. A corrupt stream yields a
/// replay with no frames rather than an error.
pub fn decode(bytes: &[u8]) -> Result<Replay, ParseError> {
    let mut reader = BinaryReader::new(bytes);

    let mode_byte = reader.read_u8()?;
    let mode = GameMode::from_byte(mode_byte).ok_or(ParseError::UnknownGameMode(mode_byte))?;
    let version = reader.read_i32()?;
    let beatmap_hash = reader.read_string()?;
    let player_name = reader.read_string()?;
    let replay_hash = reader.read_string()?;

    let hits = HitCounts {
        great: reader.read_i16()?,
        good: reader.read_i16()?,
        meh: reader.read_i16()?,
        geki: reader.read_i16()?,
        katu: reader.read_i16()?,
        miss: reader.read_i16()?,
    };

    let total_score = reader.read_i32()?;
    let max_combo = reader.read_i16()?;
    let perfect = reader.read_u8()? != 0;
    let mods = reader.read_u32()?;
    let life_bar = reader.read_string()?;
    let timestamp = reader.read_i64()?;

    let declared = reader.read_i32()?;
    if declared < 0 {
        return Err(ParseError::NegativeBlobLength(declared));
    }
    let declared = declared as usize;
    if declared > reader.remaining() {
        return Err(ParseError::BlobOverrun {
            declared,
            remaining: reader.remaining(),
        });
    }
    let compressed = reader.read_bytes(declared)?.to_vec();
    let online_score_id = reader.read_i64()?;

    let frames = actions::decode(&compressed);

    Ok(Replay {
        raw: bytes.to_vec(),
        file_name: String::new(),
        mode,
        version,
        beatmap_hash,
        player_name,
        replay_hash,
        hits,
        total_score,
        max_combo,
        perfect,
        mods,
        life_bar,
        timestamp,
        compressed,
        online_score_id,
        frames,
    })
}

/// Encode a replay back into container bytes.
///
/// The stored compressed blob is written as-is. When it is empty but the
/// replay carries frames, the frames are compressed first.
pub fn encode(replay: &Replay) -> io::Result<Vec<u8>> {
    let compressed = if replay.compressed.is_empty() && !replay.frames.is_empty() {
        actions::encode(&replay.frames)?
    } else {
        replay.compressed.clone()
    };
    let blob_len = i32::try_from(compressed.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "compressed data exceeds i32 length")
    })?;

    let mut writer = BinaryWriter::new(Vec::with_capacity(compressed.len() + 128));
    writer.write_u8(replay.mode.as_byte())?;
    writer.write_i32(replay.version)?;
    writer.write_string(&replay.beatmap_hash)?;
    writer.write_string(&replay.player_name)?;
    writer.write_string(&replay.replay_hash)?;

    let hits = &replay.hits;
    for count in [hits.great, hits.good, hits.meh, hits.geki, hits.katu, hits.miss] {
        writer.write_i16(count)?;
    }

    writer.write_i32(replay.total_score)?;
    writer.write_i16(replay.max_combo)?;
    writer.write_u8(u8::from(replay.perfect))?;
    writer.write_u32(replay.mods)?;
    writer.write_string(&replay.life_bar)?;
    writer.write_i64(replay.timestamp)?;
    writer.write_i32(blob_len)?;
    writer.write_bytes(&compressed)?;
    writer.write_i64(replay.online_score_id)?;

    Ok(writer.into_inner())
}
