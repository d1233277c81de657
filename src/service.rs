//! Replay submission: parse, store, analyse, record

use crate::analyzer::{AuditLog, DetectionPipeline, Flag};
use crate::replay::{ParseError, Replay};
use crate::store::{has_valid_keys, FileAuditLog, ReplayKey, Storage, StoreError};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no replay file was uploaded")]
    MissingFile,

    #[error("{0:?} is not an .osr replay")]
    NotAReplay(String),

    #[error("replay could not be parsed: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ServiceError {
    /// Problems with the submitted file rather than with the server
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServiceError::Storage(_))
    }
}

/// Result of analysing one submitted replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub replay_hash: String,
    pub beatmap_hash: String,
    pub player: String,
    /// `false` when an identical replay had been submitted before, or when
    /// its hashes cannot be used as storage keys
    pub newly_stored: bool,
    pub flags: Vec<Flag>,
}

pub struct Service {
    storage: Arc<dyn Storage>,
    pipeline: DetectionPipeline,
    audit_dir: Option<PathBuf>,
}

impl Service {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            pipeline: DetectionPipeline::new(),
            audit_dir: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: DetectionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Keep per-replay audit logs under `<data_dir>/task_logs/` for flagged replays
    pub fn with_audit_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(data_dir.into());
        self
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Accept an uploaded replay file
    pub fn submit(&self, file_name: &str, bytes: &[u8]) -> Result<Submission, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::MissingFile);
        }
        if !file_name.to_ascii_lowercase().ends_with(".osr") {
            return Err(ServiceError::NotAReplay(file_name.to_string()));
        }

        let replay = Replay::from_bytes(file_name, bytes)?;
        let storable = has_valid_keys(&replay);
        let newly_stored = storable && self.storage.store_replay(&replay)?;
        if storable && !newly_stored {
            info!(replay = %replay.replay_hash, "replay already stored, analysing again");
        }

        let flags = self.analyze_and_record(&replay)?;
        Ok(Submission {
            replay_hash: replay.replay_hash,
            beatmap_hash: replay.beatmap_hash,
            player: replay.player_name,
            newly_stored,
            flags,
        })
    }

    /// Run the detectors over a replay and persist the outcome.
    ///
    /// A replay whose hashes are unusable as keys is still analysed, but
    /// nothing is written for it.
    pub fn analyze_and_record(&self, replay: &Replay) -> Result<Vec<Flag>, StoreError> {
        if !has_valid_keys(replay) {
            warn!(
                replay = %replay.replay_hash,
                beatmap = %replay.beatmap_hash,
                "replay hashes cannot be used as storage keys, result not recorded"
            );
            return Ok(self.pipeline.analyze(replay, self.storage.as_corpus(), None));
        }

        let audit = match &self.audit_dir {
            Some(dir) => Some(FileAuditLog::for_replay(dir, &replay.replay_hash)?),
            None => None,
        };

        let flags = self.pipeline.analyze(
            replay,
            self.storage.as_corpus(),
            audit.as_ref().map(|a| a as &dyn AuditLog),
        );

        if flags.is_empty() {
            if let Some(audit) = audit {
                if let Err(e) = audit.discard() {
                    warn!(replay = %replay.replay_hash, "could not remove audit log: {}", e);
                }
            }
        }

        self.storage.store_detection(&replay.replay_hash, &flags)?;
        Ok(flags)
    }

    /// Re-run detection over every stored replay.
    ///
    /// Unreadable replays are logged and skipped. Returns the flagged ones.
    pub fn reanalyze_all(&self) -> Result<Vec<(ReplayKey, Vec<Flag>)>, StoreError> {
        let keys = self.storage.replay_keys()?;
        info!(replays = keys.len(), "re-analysing stored replays");

        let flagged: Vec<(ReplayKey, Vec<Flag>)> = keys
            .into_par_iter()
            .filter_map(|key| {
                let outcome = self
                    .storage
                    .load_replay(&key)
                    .and_then(|replay| match replay {
                        Some(replay) => self.analyze_and_record(&replay).map(Some),
                        None => Ok(None),
                    });
                match outcome {
                    Ok(Some(flags)) if !flags.is_empty() => Some((key, flags)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(replay = %key.replay_hash, "skipping stored replay: {}", e);
                        None
                    }
                }
            })
            .collect();

        info!(flagged = flagged.len(), "re-analysis finished");
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DetectionKind;
    use crate::replay::{codec, Frame, GameMode, HitCounts};
    use crate::store::{FileStore, MemoryStore};
    use tempfile::TempDir;

    const MAP: &str = "0123456789abcdef0123456789abcdef";

    fn replay_bytes(hash: &str, score: i32, frames: Vec<Frame>) -> Vec<u8> {
        codec::encode(&Replay {
            mode: GameMode::Standard,
            beatmap_hash: MAP.to_string(),
            replay_hash: hash.to_string(),
            player_name: format!("p-{}", hash),
            hits: HitCounts {
                great: 10,
                ..HitCounts::default()
            },
            max_combo: 10,
            total_score: score,
            frames,
            ..Replay::default()
        })
        .unwrap()
    }

    fn memory_service() -> Service {
        Service::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_rejects_bad_uploads() {
        let service = memory_service();
        assert!(matches!(service.submit("a.osr", &[]), Err(ServiceError::MissingFile)));
        assert!(matches!(
            service.submit("a.png", &[1, 2, 3]),
            Err(ServiceError::NotAReplay(_))
        ));
        let err = service.submit("a.osr", &[9, 9, 9]).unwrap_err();
        assert!(matches!(err, ServiceError::Parse(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_clean_submission() {
        let service = memory_service();
        let result = service.submit("clean.OSR", &replay_bytes("aaaa", 20_000, Vec::new())).unwrap();
        assert_eq!(result.replay_hash, "aaaa");
        assert_eq!(result.beatmap_hash, MAP);
        assert_eq!(result.player, "p-aaaa");
        assert!(result.newly_stored);
        assert!(result.flags.is_empty());

        let stats = service.storage().stats().unwrap();
        assert_eq!(stats.replay_count, 1);
        assert_eq!(stats.detection_count, 0);
    }

    #[test]
    fn test_flagged_submission_is_recorded() {
        let service = memory_service();
        let result = service
            .submit("cheat.osr", &replay_bytes("bbbb", 90_000_000, Vec::new()))
            .unwrap();
        assert_eq!(result.flags.len(), 1);
        assert_eq!(result.flags[0].kind, DetectionKind::TooHighScore);

        let stored = service.storage().load_detection("bbbb").unwrap().unwrap();
        assert_eq!(stored, result.flags);

        let again = service
            .submit("cheat.osr", &replay_bytes("bbbb", 90_000_000, Vec::new()))
            .unwrap();
        assert!(!again.newly_stored);
    }

    #[test]
    fn test_audit_logs_kept_only_for_flagged() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path().join("storage"), tmp.path().join("detection")).unwrap();
        let service = Service::new(Arc::new(store)).with_audit_dir(tmp.path().join("data"));

        service.submit("a.osr", &replay_bytes("aaaa", 20_000, Vec::new())).unwrap();
        service.submit("b.osr", &replay_bytes("bbbb", 90_000_000, Vec::new())).unwrap();

        let logs = tmp.path().join("data").join("task_logs");
        assert!(!logs.join("aaaa.log").exists());
        assert!(logs.join("bbbb.log").exists());
        assert!(tmp.path().join("detection").join("bbbb.json").exists());
    }

    #[test]
    fn test_unusable_hashes_are_analysed_but_not_stored() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path().join("storage"), tmp.path().join("detection")).unwrap();
        let service = Service::new(Arc::new(store)).with_audit_dir(tmp.path().join("data"));

        for hash in ["", "../../etc/passwd"] {
            let result = service
                .submit("cheat.osr", &replay_bytes(hash, 90_000_000, Vec::new()))
                .unwrap();
            assert!(!result.newly_stored, "{:?} must not be stored", hash);
            assert_eq!(result.flags.len(), 1);
            assert_eq!(result.flags[0].kind, DetectionKind::TooHighScore);
        }

        let stats = service.storage().stats().unwrap();
        assert_eq!(stats.replay_count, 0);
        assert_eq!(stats.detection_count, 0);
        assert!(!tmp.path().join("data").join("task_logs").exists());
    }

    #[test]
    fn test_reanalyze_all_finds_copies_submitted_earlier() {
        let service = memory_service();
        let path: Vec<Frame> = (0..200)
            .map(|i| Frame::new(16 + (i * 5) % 13, 100.0 + (i % 40) as f32 * 3.0, 150.0, 0))
            .collect();

        // The first upload had nothing to compare against
        let first = service.submit("a.osr", &replay_bytes("aaaa", 20_000, path.clone())).unwrap();
        assert!(first.flags.is_empty());
        let second = service.submit("b.osr", &replay_bytes("bbbb", 20_000, path)).unwrap();
        assert_eq!(second.flags[0].kind, DetectionKind::ReplayStolen);

        let flagged = service.reanalyze_all().unwrap();
        let hashes: Vec<_> = flagged.iter().map(|(k, _)| k.replay_hash.as_str()).collect();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains(&"aaaa"));
        assert!(hashes.contains(&"bbbb"));
    }
}
