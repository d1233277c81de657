//! replayguard - Detect cheated osu! replays
//!
//! replayguard reads `.osr` replay files, decodes their header and cursor
//! stream, and runs a set of independent detectors over each play. A replay
//! is either clean or carries one flag per detector that fired.
//!
//! # Detectors
//!
//! | Flag | Evidence |
//! |------|----------|
//! | `TOO_HIGH_SCORE` | score above what the judgements, combo and mods allow |
//! | `SPINBOT_DETECTED` | sustained rotation around the playfield centre above 500 SPM |
//! | `AUTOPLAY` | perfect accuracy with machine-regular frame timing or inhuman jumps |
//! | `TIMEWARP_OR_SPEEDHACK` | frame timing that is too uniform or cursor speeds that are too high |
//! | `REPLAY_STOLEN` | cursor path nearly identical to another stored replay of the same map |
//!
//! A detector that fails or panics is logged and skipped; it never takes the
//! other detectors down with it.
//!
//! # Quick Start
//!
//! ```no_run
//! use replayguard::{DetectionPipeline, Replay};
//! use replayguard::store::EmptyCorpus;
//!
//! let bytes = std::fs::read("suspicious.osr").unwrap();
//! let replay = Replay::from_bytes("suspicious.osr", &bytes).unwrap();
//!
//! let flags = DetectionPipeline::new().analyze(&replay, &EmptyCorpus, None);
//! for flag in &flags {
//!     println!("{}", flag);
//! }
//! ```
//!
//! # Modules
//!
//! - [`replay`]: `.osr` decoding and encoding
//! - [`mods`]: mod bitmask, score multipliers
//! - [`analyzer`]: detectors and the pipeline that runs them
//! - [`store`], [`db`]: replay and detection persistence (files or SQLite)
//! - [`service`]: submit, analyse and record in one step
//! - [`serve`]: HTTP API over the service
//! - [`report`]: JSON and CSV batch reports

pub mod analyzer;
pub mod config;
pub mod db;
pub mod mods;
pub mod replay;
pub mod report;
pub mod schema;
pub mod serve;
pub mod service;
pub mod store;

pub use analyzer::{AnalysisResult, DetectionKind, DetectionPipeline, Flag, Verdict};
pub use config::Config;
pub use db::Database;
pub use replay::{Frame, GameMode, ParseError, Replay};
pub use service::{Service, ServiceError, Submission};
pub use store::{Corpus, FileStore, MemoryStore, Storage, StoreError};

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // PUBLIC API TESTS
    // ==========================================================================

    #[test]
    fn test_public_exports() {
        let _: Verdict = Verdict::Clean;
        let _: GameMode = GameMode::default();
        let pipeline = DetectionPipeline::new();
        assert_eq!(pipeline.kinds(), DetectionKind::ALL.to_vec());
    }

    #[test]
    fn test_end_to_end_through_crate_root() {
        let replay = Replay {
            beatmap_hash: "abc".to_string(),
            replay_hash: "def".to_string(),
            total_score: -5,
            ..Replay::default()
        };
        let bytes = replay.file_bytes().unwrap().into_owned();
        let decoded = Replay::from_bytes("x.osr", &bytes).unwrap();

        let flags = DetectionPipeline::new().analyze(&decoded, &store::EmptyCorpus, None);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, DetectionKind::TooHighScore);
    }
}
