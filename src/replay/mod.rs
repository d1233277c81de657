//! osu! replay model and `.osr` container support

pub mod actions;
pub mod binary;
pub mod codec;

pub use codec::ParseError;

use crate::mods;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io;

/// .NET ticks at the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Standard,
    Taiko,
    Catch,
    Mania,
}

impl GameMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(GameMode::Standard),
            1 => Some(GameMode::Taiko),
            2 => Some(GameMode::Catch),
            3 => Some(GameMode::Mania),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            GameMode::Standard => 0,
            GameMode::Taiko => 1,
            GameMode::Catch => 2,
            GameMode::Mania => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Standard => "osu!",
            GameMode::Taiko => "taiko",
            GameMode::Catch => "catch",
            GameMode::Mania => "mania",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judgement counters as stored in the replay header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HitCounts {
    /// 300s
    pub great: i16,
    /// 100s (150s in taiko)
    pub good: i16,
    /// 50s
    pub meh: i16,
    pub geki: i16,
    pub katu: i16,
    pub miss: i16,
}

impl HitCounts {
    /// Judged objects: 300s, 100s, 50s and misses
    pub fn total_hits(&self) -> i64 {
        i64::from(self.great) + i64::from(self.good) + i64::from(self.meh) + i64::from(self.miss)
    }

    /// Accuracy in `[0, 1]` using the scoring rules of `mode`.
    ///
    /// Returns 0.0 when nothing was judged.
    pub fn accuracy(&self, mode: GameMode) -> f64 {
        let great = f64::from(self.great);
        let good = f64::from(self.good);
        let meh = f64::from(self.meh);
        let miss = f64::from(self.miss);
        let geki = f64::from(self.geki);
        let katu = f64::from(self.katu);

        let (earned, possible) = match mode {
            GameMode::Standard => (
                300.0 * great + 100.0 * good + 50.0 * meh,
                300.0 * (great + good + meh + miss),
            ),
            GameMode::Taiko => (great + 0.5 * good, great + good + miss),
            GameMode::Catch => (great + good + meh, great + good + meh + miss),
            GameMode::Mania => (
                300.0 * (geki + great) + 200.0 * katu + 100.0 * good + 50.0 * meh,
                300.0 * (geki + great + katu + good + meh + miss),
            ),
        };

        if possible <= 0.0 {
            0.0
        } else {
            (earned / possible).clamp(0.0, 1.0)
        }
    }
}

/// One cursor/input sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    /// Milliseconds since the previous frame
    pub time_delta: i64,
    pub x: f32,
    pub y: f32,
    pub keys: i32,
}

impl Frame {
    pub fn new(time_delta: i64, x: f32, y: f32, keys: i32) -> Self {
        Self {
            time_delta,
            x,
            y,
            keys,
        }
    }

    /// Euclidean distance between two cursor positions
    pub fn distance_to(&self, other: &Frame) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        dx.hypot(dy)
    }
}

/// A decoded replay.
///
/// `raw` holds the exact file bytes so the replay can be stored unchanged;
/// `compressed` is the action blob as it appeared in the file.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    pub raw: Vec<u8>,
    pub file_name: String,
    pub mode: GameMode,
    pub version: i32,
    pub beatmap_hash: String,
    pub player_name: String,
    pub replay_hash: String,
    pub hits: HitCounts,
    pub total_score: i32,
    pub max_combo: i16,
    pub perfect: bool,
    pub mods: u32,
    pub life_bar: String,
    /// Windows ticks (100ns since 0001-01-01)
    pub timestamp: i64,
    pub compressed: Vec<u8>,
    pub online_score_id: i64,
    pub frames: Vec<Frame>,
}

impl Replay {
    /// Decode `bytes` and remember which file they came from
    pub fn from_bytes(file_name: impl Into<String>, bytes: &[u8]) -> Result<Self, ParseError> {
        let mut replay = codec::decode(bytes)?;
        replay.file_name = file_name.into();
        Ok(replay)
    }

    /// Bytes to persist: the original file when known, otherwise a fresh encoding
    pub fn file_bytes(&self) -> io::Result<Cow<'_, [u8]>> {
        if self.raw.is_empty() {
            codec::encode(self).map(Cow::Owned)
        } else {
            Ok(Cow::Borrowed(&self.raw))
        }
    }

    pub fn accuracy(&self) -> f64 {
        self.hits.accuracy(self.mode)
    }

    pub fn mods_string(&self) -> String {
        mods::mods_string(self.mods)
    }

    /// When the play was set, if the tick count is representable
    pub fn played_at(&self) -> Option<DateTime<Utc>> {
        let since_epoch = self.timestamp.checked_sub(UNIX_EPOCH_TICKS)?;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    /// Total replay length in ms
    pub fn duration_ms(&self) -> i64 {
        self.frames
            .iter()
            .fold(0i64, |acc, f| acc.saturating_add(f.time_delta))
    }
}

impl fmt::Display for Replay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} [{}] +{} score={} combo={}x acc={:.2}% frames={}",
            if self.player_name.is_empty() { "<unknown>" } else { &self.player_name },
            if self.beatmap_hash.is_empty() { "<unknown>" } else { &self.beatmap_hash },
            self.mode,
            self.mods_string(),
            self.total_score,
            self.max_combo,
            self.accuracy() * 100.0,
            self.frames.len()
        )
    }
}
