//! Replay and detection persistence
//!
//! Detectors only need [`Corpus`]: the other stored plays of a beatmap.
//! The submission service needs the full [`Storage`] surface. Three
//! implementations exist:
//!
//! - [`FileStore`]: `.osr` files and JSON detection records on disk
//! - [`crate::db::Database`]: SQLite via diesel
//! - [`MemoryStore`]: in-process, used for batch runs and tests

pub mod file;

pub use file::{FileAuditLog, FileStore};

use crate::analyzer::Flag;
use crate::replay::{ParseError, Replay};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid detection record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("invalid hash {0:?}: expected 1-64 ASCII letters or digits")]
    InvalidKey(String),

    #[error("stored replay {key} is corrupt: {source}")]
    CorruptReplay {
        key: String,
        #[source]
        source: ParseError,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Hashes become path components and primary keys; keep them to plain hex-like text
pub fn validate_key(key: &str) -> Result<&str> {
    if !key.is_empty() && key.len() <= 64 && key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(key)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Whether both of the replay's hashes can serve as storage keys
pub fn has_valid_keys(replay: &Replay) -> bool {
    validate_key(&replay.replay_hash).is_ok() && validate_key(&replay.beatmap_hash).is_ok()
}

/// Read access to previously stored replays
pub trait Corpus: Send + Sync {
    /// Stored replays of `beatmap_hash`, excluding `exclude_replay_hash`.
    /// Unreadable entries are skipped.
    fn list_replays_for_beatmap(
        &self,
        beatmap_hash: &str,
        exclude_replay_hash: &str,
    ) -> Result<Vec<Replay>>;
}

/// A corpus with nothing in it
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCorpus;

impl Corpus for EmptyCorpus {
    fn list_replays_for_beatmap(&self, _: &str, _: &str) -> Result<Vec<Replay>> {
        Ok(Vec::new())
    }
}

/// Identity of a stored replay
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplayKey {
    pub beatmap_hash: String,
    pub replay_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub replay_count: u64,
    pub detection_count: u64,
}

/// Stored replays of one beatmap and the flags raised against them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatmapReport {
    pub hash: String,
    pub replay_count: u64,
    /// Only replays with at least one flag
    pub flagged_replays: BTreeMap<String, Vec<Flag>>,
}

pub trait Storage: Corpus {
    /// Persist the replay. Returns `false` when it was already stored.
    fn store_replay(&self, replay: &Replay) -> Result<bool>;

    /// Persist the flags raised for a replay.
    ///
    /// Write-once: an existing non-empty record is kept. An empty `flags`
    /// writes nothing and clears a leftover empty record.
    fn store_detection(&self, replay_hash: &str, flags: &[Flag]) -> Result<()>;

    fn load_detection(&self, replay_hash: &str) -> Result<Option<Vec<Flag>>>;

    fn load_replay(&self, key: &ReplayKey) -> Result<Option<Replay>>;

    fn replay_keys(&self) -> Result<Vec<ReplayKey>>;

    fn stats(&self) -> Result<StoreStats>;

    /// `None` when nothing is stored for the beatmap
    fn beatmap_report(&self, beatmap_hash: &str) -> Result<Option<BeatmapReport>>;

    fn as_corpus(&self) -> &dyn Corpus;
}

/// Storage held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    replays: RwLock<BTreeMap<String, BTreeMap<String, Replay>>>,
    detections: RwLock<HashMap<String, Vec<Flag>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-parsed replays, e.g. a batch about to be analysed
    pub fn from_replays(replays: impl IntoIterator<Item = Replay>) -> Self {
        let store = Self::new();
        {
            let mut map = store.replays.write();
            for replay in replays {
                map.entry(replay.beatmap_hash.clone())
                    .or_default()
                    .entry(replay.replay_hash.clone())
                    .or_insert(replay);
            }
        }
        store
    }
}

impl Corpus for MemoryStore {
    fn list_replays_for_beatmap(&self, beatmap_hash: &str, exclude: &str) -> Result<Vec<Replay>> {
        Ok(self
            .replays
            .read()
            .get(beatmap_hash)
            .map(|by_hash| {
                by_hash
                    .iter()
                    .filter(|(hash, _)| hash.as_str() != exclude)
                    .map(|(_, replay)| replay.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Storage for MemoryStore {
    fn store_replay(&self, replay: &Replay) -> Result<bool> {
        let mut map = self.replays.write();
        let by_hash = map.entry(replay.beatmap_hash.clone()).or_default();
        if by_hash.contains_key(&replay.replay_hash) {
            return Ok(false);
        }
        by_hash.insert(replay.replay_hash.clone(), replay.clone());
        Ok(true)
    }

    fn store_detection(&self, replay_hash: &str, flags: &[Flag]) -> Result<()> {
        let mut detections = self.detections.write();
        if flags.is_empty() {
            if detections.get(replay_hash).is_some_and(|f| f.is_empty()) {
                detections.remove(replay_hash);
            }
            return Ok(());
        }
        detections
            .entry(replay_hash.to_string())
            .or_insert_with(|| flags.to_vec());
        Ok(())
    }

    fn load_detection(&self, replay_hash: &str) -> Result<Option<Vec<Flag>>> {
        Ok(self.detections.read().get(replay_hash).cloned())
    }

    fn load_replay(&self, key: &ReplayKey) -> Result<Option<Replay>> {
        Ok(self
            .replays
            .read()
            .get(&key.beatmap_hash)
            .and_then(|by_hash| by_hash.get(&key.replay_hash))
            .cloned())
    }

    fn replay_keys(&self) -> Result<Vec<ReplayKey>> {
        Ok(self
            .replays
            .read()
            .iter()
            .flat_map(|(beatmap, by_hash)| {
                by_hash.keys().map(move |replay| ReplayKey {
                    beatmap_hash: beatmap.clone(),
                    replay_hash: replay.clone(),
                })
            })
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let replay_count = self.replays.read().values().map(|m| m.len() as u64).sum();
        let detection_count = self.detections.read().len() as u64;
        Ok(StoreStats {
            replay_count,
            detection_count,
        })
    }

    fn beatmap_report(&self, beatmap_hash: &str) -> Result<Option<BeatmapReport>> {
        let replays = self.replays.read();
        let Some(by_hash) = replays.get(beatmap_hash).filter(|m| !m.is_empty()) else {
            return Ok(None);
        };
        let detections = self.detections.read();
        let flagged_replays = by_hash
            .keys()
            .filter_map(|hash| {
                detections
                    .get(hash)
                    .filter(|flags| !flags.is_empty())
                    .map(|flags| (hash.clone(), flags.clone()))
            })
            .collect();

        Ok(Some(BeatmapReport {
            hash: beatmap_hash.to_string(),
            replay_count: by_hash.len() as u64,
            flagged_replays,
        }))
    }

    fn as_corpus(&self) -> &dyn Corpus {
        self
    }
}
