//! Report generation for batch results
//!
//! - **JSON**: summary plus every result, for programmatic consumption
//! - **CSV**: one row per replay, flags joined with `;`
//!
//! ```ignore
//! use replayguard::report;
//!
//! // Format follows the extension; anything but .json is CSV
//! report::generate("scan.json", &results)?;
//! report::generate("scan.csv", &results)?;
//! ```

pub mod csv;
pub mod json;

use crate::analyzer::{AnalysisResult, DetectionKind, Verdict};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Write `results` to `path`, choosing the format from its extension
pub fn generate<P: AsRef<Path>>(path: P, results: &[AnalysisResult]) -> io::Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut file = std::fs::File::create(path)?;

    match ext.as_str() {
        "json" => json::write(&mut file, results),
        _ => csv::write(&mut file, results),
    }
}

/// Verdict and flag counts for a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub clean: usize,
    pub flagged: usize,
    pub error: usize,
    /// Replays carrying each kind of flag
    pub by_kind: BTreeMap<DetectionKind, usize>,
}

impl Summary {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };

        for r in results {
            match r.verdict {
                Verdict::Clean => summary.clean += 1,
                Verdict::Flagged => summary.flagged += 1,
                Verdict::Error => summary.error += 1,
            }
            for kind in DetectionKind::ALL {
                if r.has_flag(kind) {
                    *summary.by_kind.entry(kind).or_insert(0) += 1;
                }
            }
        }

        summary
    }

    pub fn count(&self, kind: DetectionKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}
