//! Ordered, failure-isolated detector execution

use super::{AnalysisContext, AuditLog, Check, DetectionKind, Detector, DetectorError, Flag};
use crate::replay::Replay;
use crate::store::Corpus;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

/// Runs a fixed sequence of checks over a replay.
///
/// A check that errors or panics is logged and skipped; the remaining
/// checks still run. Flags come back in check order.
pub struct DetectionPipeline {
    checks: Vec<Box<dyn Check>>,
}

impl Default for DetectionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionPipeline {
    /// All built-in detectors in their standard order
    pub fn new() -> Self {
        Self {
            checks: Detector::ALL
                .iter()
                .map(|d| Box::new(*d) as Box<dyn Check>)
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    /// Append a check after the existing ones
    pub fn with_check(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn kinds(&self) -> Vec<DetectionKind> {
        self.checks.iter().map(|c| c.kind()).collect()
    }

    pub fn analyze(
        &self,
        replay: &Replay,
        corpus: &dyn Corpus,
        audit: Option<&dyn AuditLog>,
    ) -> Vec<Flag> {
        let span = info_span!(
            "analyze",
            replay = %replay.replay_hash,
            beatmap = %replay.beatmap_hash,
            player = %replay.player_name
        );
        let _guard = span.enter();
        let started = Instant::now();

        let ctx = AnalysisContext::new(corpus, audit);
        let flags: Vec<Flag> = self
            .checks
            .iter()
            .filter_map(|check| run_check(check.as_ref(), replay, &ctx))
            .collect();

        info!(
            flags = flags.len(),
            frames = replay.frames.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );
        flags
    }
}

fn run_check(check: &dyn Check, replay: &Replay, ctx: &AnalysisContext<'_>) -> Option<Flag> {
    let kind = check.kind();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if check.applicable(replay) {
            check.evaluate(replay, ctx).map(Some)
        } else {
            Ok(None)
        }
    }))
    .unwrap_or_else(|payload| Err(DetectorError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(Some(Some(flag))) => {
            info!(detector = %kind, reason = %flag.reason, "flag raised");
            Some(flag)
        }
        Ok(Some(None)) => {
            debug!(detector = %kind, "no flag");
            None
        }
        Ok(None) => {
            debug!(detector = %kind, "not applicable");
            None
        }
        Err(e) => {
            warn!(detector = %kind, "detector failed: {}", e);
            ctx.note(kind, &format!("detector failed: {}", e));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
