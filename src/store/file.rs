//! On-disk storage
//!
//! ```text
//! <replay_dir>/<beatmap_hash>/<replay_hash>.osr   raw replay bytes
//! <detection_dir>/<replay_hash>.json              pretty-printed flags
//! <data_dir>/task_logs/<replay_hash>.log          detector audit trail
//! ```
//!
//! Records are written to a temporary file in the target directory and then
//! linked into place without clobbering, so readers never see a partial file
//! and concurrent submissions of the same replay cannot overwrite each other.

use super::{validate_key, BeatmapReport, Corpus, ReplayKey, Result, Storage, StoreError, StoreStats};
use crate::analyzer::{AuditLog, DetectionKind, Flag};
use crate::replay::Replay;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

const REPLAY_EXT: &str = "osr";
const DETECTION_EXT: &str = "json";

pub struct FileStore {
    replay_dir: PathBuf,
    detection_dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the replay and detection directories
    pub fn open(replay_dir: impl Into<PathBuf>, detection_dir: impl Into<PathBuf>) -> Result<Self> {
        let replay_dir = replay_dir.into();
        let detection_dir = detection_dir.into();
        fs::create_dir_all(&replay_dir)?;
        fs::create_dir_all(&detection_dir)?;
        Ok(Self {
            replay_dir,
            detection_dir,
        })
    }

    fn beatmap_dir(&self, beatmap_hash: &str) -> Result<PathBuf> {
        Ok(self.replay_dir.join(validate_key(beatmap_hash)?))
    }

    fn replay_path(&self, key: &ReplayKey) -> Result<PathBuf> {
        Ok(self
            .beatmap_dir(&key.beatmap_hash)?
            .join(format!("{}.{}", validate_key(&key.replay_hash)?, REPLAY_EXT)))
    }

    fn detection_path(&self, replay_hash: &str) -> Result<PathBuf> {
        Ok(self
            .detection_dir
            .join(format!("{}.{}", validate_key(replay_hash)?, DETECTION_EXT)))
    }

    fn read_replay(path: &Path) -> Result<Replay> {
        let bytes = fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Replay::from_bytes(file_name, &bytes).map_err(|source| StoreError::CorruptReplay {
            key: path.display().to_string(),
            source,
        })
    }

    /// `.osr` files in a directory, sorted by name
    fn replay_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == REPLAY_EXT) && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn count_files(dir: &Path, ext: &str) -> Result<u64> {
        let mut count = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == ext) {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Write `bytes` to `path` unless it already exists.
///
/// Returns `false` when another writer got there first.
fn write_once(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".partial-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    persist_once(tmp, path)
}

fn persist_once(tmp: NamedTempFile, path: &Path) -> io::Result<bool> {
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl Corpus for FileStore {
    fn list_replays_for_beatmap(&self, beatmap_hash: &str, exclude: &str) -> Result<Vec<Replay>> {
        let dir = self.beatmap_dir(beatmap_hash)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut replays = Vec::new();
        for path in Self::replay_files(&dir)? {
            if file_stem(&path) == exclude {
                continue;
            }
            match Self::read_replay(&path) {
                Ok(replay) => replays.push(replay),
                Err(e) => error!(path = %path.display(), "skipping unreadable stored replay: {}", e),
            }
        }
        Ok(replays)
    }
}

impl Storage for FileStore {
    fn store_replay(&self, replay: &Replay) -> Result<bool> {
        let key = ReplayKey {
            beatmap_hash: replay.beatmap_hash.clone(),
            replay_hash: replay.replay_hash.clone(),
        };
        let path = self.replay_path(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            return Ok(false);
        }
        let bytes = replay.file_bytes()?;
        let stored = write_once(&path, &bytes)?;
        if stored {
            debug!(path = %path.display(), "stored replay");
        }
        Ok(stored)
    }

    fn store_detection(&self, replay_hash: &str, flags: &[Flag]) -> Result<()> {
        let path = self.detection_path(replay_hash)?;

        if flags.is_empty() {
            if let Ok(Some(existing)) = self.load_detection(replay_hash) {
                if existing.is_empty() {
                    fs::remove_file(&path)?;
                    debug!(path = %path.display(), "removed empty detection record");
                }
            }
            return Ok(());
        }

        let json = serde_json::to_string_pretty(flags)?;
        if write_once(&path, json.as_bytes())? {
            debug!(path = %path.display(), flags = flags.len(), "stored detection");
        } else {
            debug!(path = %path.display(), "detection already recorded");
        }
        Ok(())
    }

    fn load_detection(&self, replay_hash: &str) -> Result<Option<Vec<Flag>>> {
        let path = self.detection_path(replay_hash)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load_replay(&self, key: &ReplayKey) -> Result<Option<Replay>> {
        let path = self.replay_path(key)?;
        if !path.is_file() {
            return Ok(None);
        }
        Self::read_replay(&path).map(Some)
    }

    fn replay_keys(&self) -> Result<Vec<ReplayKey>> {
        let mut keys = Vec::new();
        for dir in Self::subdirectories(&self.replay_dir)? {
            let beatmap_hash = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            for path in Self::replay_files(&dir)? {
                keys.push(ReplayKey {
                    beatmap_hash: beatmap_hash.clone(),
                    replay_hash: file_stem(&path),
                });
            }
        }
        Ok(keys)
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut replay_count = 0;
        for dir in Self::subdirectories(&self.replay_dir)? {
            replay_count += Self::count_files(&dir, REPLAY_EXT)?;
        }
        Ok(StoreStats {
            replay_count,
            detection_count: Self::count_files(&self.detection_dir, DETECTION_EXT)?,
        })
    }

    fn beatmap_report(&self, beatmap_hash: &str) -> Result<Option<BeatmapReport>> {
        let dir = self.beatmap_dir(beatmap_hash)?;
        if !dir.is_dir() {
            return Ok(None);
        }

        let files = Self::replay_files(&dir)?;
        let mut flagged_replays = BTreeMap::new();
        for path in &files {
            let hash = file_stem(path);
            match self.load_detection(&hash) {
                Ok(Some(flags)) if !flags.is_empty() => {
                    flagged_replays.insert(hash, flags);
                }
                Ok(_) => {}
                Err(e) => warn!(replay = %hash, "unreadable detection record: {}", e),
            }
        }

        Ok(Some(BeatmapReport {
            hash: beatmap_hash.to_string(),
            replay_count: files.len() as u64,
            flagged_replays,
        }))
    }

    fn as_corpus(&self) -> &dyn Corpus {
        self
    }
}

/// Appends detector diagnostics for one replay to `task_logs/<hash>.log`.
///
/// The file is only created on the first line written. Call
/// [`FileAuditLog::discard`] when the replay came out clean.
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditLog {
    pub fn for_replay(data_dir: &Path, replay_hash: &str) -> Result<Self> {
        let path = data_dir
            .join("task_logs")
            .join(format!("{}.log", validate_key(replay_hash)?));
        Ok(Self {
            path,
            file: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            *guard = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        match guard.as_mut() {
            Some(file) => writeln!(file, "{}", line),
            None => Ok(()),
        }
    }

    /// Delete the log file, if any was written
    pub fn discard(self) -> io::Result<()> {
        drop(self.file.into_inner());
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, kind: DetectionKind, message: &str) {
        let line = format!("{} [{}] {}", chrono::Local::now().to_rfc3339(), kind, message);
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), "could not write audit log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{codec, Frame};
    use tempfile::TempDir;

    const MAP: &str = "0123456789abcdef0123456789abcdef";

    fn store(tmp: &TempDir) -> FileStore {
        FileStore::open(tmp.path().join("storage"), tmp.path().join("detection")).unwrap()
    }

    fn replay(hash: &str) -> Replay {
        let built = Replay {
            beatmap_hash: MAP.to_string(),
            replay_hash: hash.to_string(),
            player_name: format!("player-{}", hash),
            frames: vec![Frame::new(16, 10.0, 20.0, 1)],
            ..Replay::default()
        };
        let bytes = codec::encode(&built).unwrap();
        Replay::from_bytes(format!("{}.osr", hash), &bytes).unwrap()
    }

    fn flag(reason: &str) -> Flag {
        Flag::new(DetectionKind::ReplayStolen, reason)
    }

    #[test]
    fn test_replay_layout_and_dedup() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let r = replay("aaaa");

        assert!(store.store_replay(&r).unwrap());
        assert!(!store.store_replay(&r).unwrap());

        let path = tmp.path().join("storage").join(MAP).join("aaaa.osr");
        assert_eq!(fs::read(path).unwrap(), r.raw);
    }

    #[test]
    fn test_existing_record_is_never_clobbered() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let dir = tmp.path().join("storage").join(MAP);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("aaaa.osr"), b"first writer").unwrap();

        assert!(!store.store_replay(&replay("aaaa")).unwrap());
        assert_eq!(fs::read(dir.join("aaaa.osr")).unwrap(), b"first writer");

        let path = dir.join("late.bin");
        fs::write(&path, b"kept").unwrap();
        let staged = tempfile::Builder::new().prefix(".partial-").tempfile_in(&dir).unwrap();
        assert!(!persist_once(staged, &path).unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"kept");
    }

    #[test]
    fn test_writes_leave_no_partial_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.store_replay(&replay("aaaa")).unwrap();
        store.store_replay(&replay("aaaa")).unwrap();
        store.store_detection("aaaa", &[flag("first")]).unwrap();
        store.store_detection("aaaa", &[flag("again")]).unwrap();

        let names = |dir: PathBuf| -> Vec<String> {
            let mut names: Vec<_> = fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        };
        assert_eq!(names(tmp.path().join("storage").join(MAP)), vec!["aaaa.osr"]);
        assert_eq!(names(tmp.path().join("detection")), vec!["aaaa.json"]);
    }

    #[test]
    fn test_listing_excludes_and_skips_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.store_replay(&replay("aaaa")).unwrap();
        store.store_replay(&replay("bbbb")).unwrap();
        fs::write(tmp.path().join("storage").join(MAP).join("cccc.osr"), b"junk").unwrap();
        fs::write(tmp.path().join("storage").join(MAP).join("notes.txt"), b"hi").unwrap();

        let listed = store.list_replays_for_beatmap(MAP, "aaaa").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].replay_hash, "bbbb");
        assert_eq!(listed[0].player_name, "player-bbbb");

        assert!(store.list_replays_for_beatmap("ffff", "").unwrap().is_empty());
    }

    #[test]
    fn test_path_traversal_hash_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let mut r = replay("aaaa");
        r.beatmap_hash = "../escape".to_string();
        assert!(matches!(store.store_replay(&r), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_detection_write_once_pretty_json() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.store_detection("aaaa", &[flag("first")]).unwrap();
        store.store_detection("aaaa", &[flag("second")]).unwrap();

        let text = fs::read_to_string(tmp.path().join("detection").join("aaaa.json")).unwrap();
        assert!(text.contains("\n"), "expected pretty-printed JSON");
        assert!(text.contains("\"flag\": \"REPLAY_STOLEN\""), "{}", text);
        assert_eq!(store.load_detection("aaaa").unwrap(), Some(vec![flag("first")]));
    }

    #[test]
    fn test_clean_result_writes_nothing_and_clears_empty_marker() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let path = tmp.path().join("detection").join("aaaa.json");

        store.store_detection("aaaa", &[]).unwrap();
        assert!(!path.exists());

        fs::write(&path, "[]").unwrap();
        store.store_detection("aaaa", &[]).unwrap();
        assert!(!path.exists());

        store.store_detection("aaaa", &[flag("now flagged")]).unwrap();
        assert_eq!(store.load_detection("aaaa").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_stats_keys_and_beatmap_report() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.store_replay(&replay("aaaa")).unwrap();
        store.store_replay(&replay("bbbb")).unwrap();
        store.store_detection("bbbb", &[flag("copied")]).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.replay_count, 2);
        assert_eq!(stats.detection_count, 1);

        let keys = store.replay_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].replay_hash, "aaaa");
        assert_eq!(keys[0].beatmap_hash, MAP);

        let loaded = store.load_replay(&keys[1]).unwrap().unwrap();
        assert_eq!(loaded.replay_hash, "bbbb");

        let report = store.beatmap_report(MAP).unwrap().unwrap();
        assert_eq!(report.replay_count, 2);
        assert_eq!(report.flagged_replays.keys().collect::<Vec<_>>(), vec!["bbbb"]);
        assert!(store.beatmap_report("ffff").unwrap().is_none());
    }

    #[test]
    fn test_audit_log_lifecycle() {
        let tmp = TempDir::new().unwrap();

        let quiet = FileAuditLog::for_replay(tmp.path(), "aaaa").unwrap();
        assert!(!quiet.path().exists());
        quiet.discard().unwrap();

        let log = FileAuditLog::for_replay(tmp.path(), "bbbb").unwrap();
        log.record(DetectionKind::Autoplay, "identical=0.99");
        log.record(DetectionKind::Autoplay, "stddev=0.00ms");
        let path = log.path().to_path_buf();
        assert_eq!(path, tmp.path().join("task_logs").join("bbbb.log"));

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("[AUTOPLAY] identical=0.99"));

        log.discard().unwrap();
        assert!(!path.exists());
    }
}
