//! Cheat detection
//!
//! Each detector inspects one aspect of a replay and either stays silent or
//! raises a single [`Flag`] explaining what looked impossible:
//!
//! | Detector | Looks at | Flag |
//! |----------|----------|------|
//! | [`score`] | header counters, mods | `TOO_HIGH_SCORE` |
//! | [`spinbot`] | circular cursor motion | `SPINBOT_DETECTED` |
//! | [`autoplay`] | accuracy, input timing, jumps | `AUTOPLAY` |
//! | [`timewarp`] | frame timing, cursor velocity | `TIMEWARP_OR_SPEEDHACK` |
//! | [`theft`] | cursor paths of other plays on the map | `REPLAY_STOLEN` |
//!
//! [`DetectionPipeline`] runs them in that order and keeps one broken
//! detector from taking the others down.

pub mod autoplay;
pub mod pipeline;
pub mod score;
pub mod spinbot;
pub mod theft;
pub mod timewarp;

pub use pipeline::DetectionPipeline;

use crate::replay::{GameMode, Replay};
use crate::store::{Corpus, EmptyCorpus, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Kind of cheating a flag reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionKind {
    TooHighScore,
    SpinbotDetected,
    Autoplay,
    TimewarpOrSpeedhack,
    ReplayStolen,
}

impl DetectionKind {
    pub const ALL: [DetectionKind; 5] = [
        DetectionKind::TooHighScore,
        DetectionKind::SpinbotDetected,
        DetectionKind::Autoplay,
        DetectionKind::TimewarpOrSpeedhack,
        DetectionKind::ReplayStolen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionKind::TooHighScore => "TOO_HIGH_SCORE",
            DetectionKind::SpinbotDetected => "SPINBOT_DETECTED",
            DetectionKind::Autoplay => "AUTOPLAY",
            DetectionKind::TimewarpOrSpeedhack => "TIMEWARP_OR_SPEEDHACK",
            DetectionKind::ReplayStolen => "REPLAY_STOLEN",
        }
    }
}

impl fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A positive detection with a human-readable explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    #[serde(rename = "flag")]
    pub kind: DetectionKind,
    pub reason: String,
}

impl Flag {
    pub fn new(kind: DetectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("{metric} is not a finite number")]
    NonFinite { metric: &'static str },

    #[error("corpus lookup failed: {0}")]
    Corpus(#[from] StoreError),

    #[error("detector panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

pub(crate) fn finite(metric: &'static str, value: f64) -> Result<f64, DetectorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DetectorError::NonFinite { metric })
    }
}

/// Per-replay sink for detector diagnostics
pub trait AuditLog: Send + Sync {
    fn record(&self, kind: DetectionKind, message: &str);
}

/// Keeps audit lines in memory, for display or inspection
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, kind: DetectionKind, message: &str) {
        self.lines.lock().push(format!("[{}] {}", kind, message));
    }
}

static NO_CORPUS: EmptyCorpus = EmptyCorpus;

/// What a detector may consult besides the replay itself
#[derive(Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub corpus: &'a dyn Corpus,
    audit: Option<&'a dyn AuditLog>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(corpus: &'a dyn Corpus, audit: Option<&'a dyn AuditLog>) -> Self {
        Self { corpus, audit }
    }

    /// No stored replays, no audit log
    pub fn detached() -> AnalysisContext<'static> {
        AnalysisContext {
            corpus: &NO_CORPUS,
            audit: None,
        }
    }

    /// Trace a diagnostic and copy it into the audit log when one is attached
    pub fn note(&self, kind: DetectionKind, message: &str) {
        debug!(detector = %kind, "{}", message);
        if let Some(audit) = self.audit {
            audit.record(kind, message);
        }
    }
}

/// A single detection rule
pub trait Check: Send + Sync {
    fn kind(&self) -> DetectionKind;

    /// Whether the rule means anything for this replay (mode, data volume)
    fn applicable(&self, replay: &Replay) -> bool;

    /// At most one flag per invocation
    fn evaluate(
        &self,
        replay: &Replay,
        ctx: &AnalysisContext<'_>,
    ) -> Result<Option<Flag>, DetectorError>;
}

/// The built-in detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    ScoreBound,
    Spinbot,
    FullAutoplay,
    Timewarp,
    ReplayTheft,
}

impl Detector {
    /// Built-in detectors in evaluation order
    pub const ALL: [Detector; 5] = [
        Detector::ScoreBound,
        Detector::Spinbot,
        Detector::FullAutoplay,
        Detector::Timewarp,
        Detector::ReplayTheft,
    ];
}

impl Check for Detector {
    fn kind(&self) -> DetectionKind {
        match self {
            Detector::ScoreBound => DetectionKind::TooHighScore,
            Detector::Spinbot => DetectionKind::SpinbotDetected,
            Detector::FullAutoplay => DetectionKind::Autoplay,
            Detector::Timewarp => DetectionKind::TimewarpOrSpeedhack,
            Detector::ReplayTheft => DetectionKind::ReplayStolen,
        }
    }

    fn applicable(&self, replay: &Replay) -> bool {
        match self {
            Detector::ScoreBound => score::applicable(replay),
            Detector::Spinbot => spinbot::applicable(replay),
            Detector::FullAutoplay => autoplay::applicable(replay),
            Detector::Timewarp => timewarp::applicable(replay),
            Detector::ReplayTheft => theft::applicable(replay),
        }
    }

    fn evaluate(
        &self,
        replay: &Replay,
        ctx: &AnalysisContext<'_>,
    ) -> Result<Option<Flag>, DetectorError> {
        match self {
            Detector::ScoreBound => score::evaluate(replay, ctx),
            Detector::Spinbot => spinbot::evaluate(replay, ctx),
            Detector::FullAutoplay => autoplay::evaluate(replay, ctx),
            Detector::Timewarp => timewarp::evaluate(replay, ctx),
            Detector::ReplayTheft => theft::evaluate(replay, ctx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Clean,
    Flagged,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Clean => write!(f, "CLEAN"),
            Verdict::Flagged => write!(f, "FLAGGED"),
            Verdict::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of analysing one replay file, as shown in reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub file_path: String,
    pub file_name: String,
    pub player: String,
    pub beatmap_hash: String,
    pub replay_hash: String,
    pub mode: Option<GameMode>,
    pub mods: String,
    pub score: i32,
    pub max_combo: i16,
    pub accuracy: f64,
    pub frame_count: usize,
    pub played_at: Option<String>,
    pub verdict: Verdict,
    pub flags: Vec<Flag>,
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn from_replay(path: &Path, replay: &Replay, flags: Vec<Flag>) -> Self {
        let verdict = if flags.is_empty() {
            Verdict::Clean
        } else {
            Verdict::Flagged
        };
        Self {
            file_path: path.display().to_string(),
            file_name: file_name_of(path),
            player: replay.player_name.clone(),
            beatmap_hash: replay.beatmap_hash.clone(),
            replay_hash: replay.replay_hash.clone(),
            mode: Some(replay.mode),
            mods: replay.mods_string(),
            score: replay.total_score,
            max_combo: replay.max_combo,
            accuracy: replay.accuracy(),
            frame_count: replay.frames.len(),
            played_at: replay.played_at().map(|t| t.to_rfc3339()),
            verdict,
            flags,
            error: None,
        }
    }

    pub fn failed(path: &Path, error: impl fmt::Display) -> Self {
        Self {
            file_path: path.display().to_string(),
            file_name: file_name_of(path),
            player: String::new(),
            beatmap_hash: String::new(),
            replay_hash: String::new(),
            mode: None,
            mods: String::new(),
            score: 0,
            max_combo: 0,
            accuracy: 0.0,
            frame_count: 0,
            played_at: None,
            verdict: Verdict::Error,
            flags: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn has_flag(&self, kind: DetectionKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_serialized_form() {
        for kind in DetectionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_flag_json_shape() {
        let flag = Flag::new(DetectionKind::Autoplay, "robotic timing");
        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["flag"], "AUTOPLAY");
        assert_eq!(json["reason"], "robotic timing");

        let back: Flag = serde_json::from_value(json).unwrap();
        assert_eq!(back, flag);
    }

    #[test]
    fn test_detector_order_and_kinds() {
        let kinds: Vec<_> = Detector::ALL.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, DetectionKind::ALL.to_vec());
    }

    #[test]
    fn test_note_reaches_audit_log() {
        let audit = MemoryAuditLog::new();
        let ctx = AnalysisContext::new(&NO_CORPUS, Some(&audit));
        ctx.note(DetectionKind::SpinbotDetected, "segment at 1200ms: 612 spm");
        assert_eq!(audit.lines(), vec!["[SPINBOT_DETECTED] segment at 1200ms: 612 spm"]);
    }

    #[test]
    fn test_finite_guard() {
        assert_eq!(finite("x", 1.5).unwrap(), 1.5);
        assert!(matches!(
            finite("similarity", f64::NAN),
            Err(DetectorError::NonFinite { metric: "similarity" })
        ));
        assert!(finite("x", f64::INFINITY).is_err());
    }

    #[test]
    fn test_result_verdicts() {
        let replay = testing::standard_replay(Vec::new());
        let path = Path::new("/replays/test.osr");

        let clean = AnalysisResult::from_replay(path, &replay, Vec::new());
        assert_eq!(clean.verdict, Verdict::Clean);
        assert_eq!(clean.file_name, "test.osr");

        let flagged = AnalysisResult::from_replay(
            path,
            &replay,
            vec![Flag::new(DetectionKind::TooHighScore, "x")],
        );
        assert_eq!(flagged.verdict, Verdict::Flagged);
        assert!(flagged.has_flag(DetectionKind::TooHighScore));
        assert!(!flagged.has_flag(DetectionKind::Autoplay));

        let failed = AnalysisResult::failed(path, "replay truncated");
        assert_eq!(failed.verdict, Verdict::Error);
        assert_eq!(failed.error.as_deref(), Some("replay truncated"));
    }
}
