//! Timewarp / speedhack detection
//!
//! Slowing the game clock leaves two marks in the action stream: frame
//! timing that is far too uniform at a very short interval, or cursor
//! velocities that only make sense if the game ran slower than it reports.

use super::{finite, AnalysisContext, DetectionKind, DetectorError, Flag};
use crate::replay::{Frame, GameMode, Replay};
use std::collections::BTreeMap;

const MIN_FRAMES: usize = 10;

const CONSISTENCY_THRESHOLD: f64 = 0.95;
const MAX_CONSISTENT_DELTA_MS: i64 = 20;

/// px/ms above which a move counts as fast
const FAST_VELOCITY: f64 = 3.0;
const FAST_SHARE_THRESHOLD: f64 = 0.1;
const FAST_AVERAGE_THRESHOLD: f64 = 5.0;

pub fn applicable(replay: &Replay) -> bool {
    matches!(replay.mode, GameMode::Standard | GameMode::Catch)
        && replay.frames.len() >= MIN_FRAMES
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingProfile {
    /// Most frequent frame delta (smallest on ties)
    pub dominant_delta: i64,
    /// Occurrences of the dominant delta over the total frame count
    pub consistency: f64,
    /// Moves faster than 3 px/ms
    pub fast_moves: usize,
    /// Average velocity of the fast moves, px/ms
    pub fast_average: f64,
    pub frame_count: usize,
}

impl TimingProfile {
    pub fn is_uniform(&self) -> bool {
        self.consistency > CONSISTENCY_THRESHOLD && self.dominant_delta < MAX_CONSISTENT_DELTA_MS
    }

    pub fn is_too_fast(&self) -> bool {
        self.fast_moves as f64 > self.frame_count as f64 * FAST_SHARE_THRESHOLD
            && self.fast_average > FAST_AVERAGE_THRESHOLD
    }
}

/// Profile timing and velocity over every consecutive pair of frames
pub fn profile(frames: &[Frame]) -> TimingProfile {
    let mut deltas: BTreeMap<i64, usize> = BTreeMap::new();
    let mut fast_moves = 0usize;
    let mut fast_total = 0.0;

    for pair in frames.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        *deltas.entry(curr.time_delta).or_insert(0) += 1;

        if curr.time_delta > 0 {
            let velocity = prev.distance_to(curr) / curr.time_delta as f64;
            if velocity > FAST_VELOCITY {
                fast_moves += 1;
                fast_total += velocity;
            }
        }
    }

    // Ascending iteration with a strict comparison keeps the smallest delta on ties
    let (dominant_delta, dominant_count) = deltas
        .iter()
        .fold((0, 0), |best, (&delta, &count)| {
            if count > best.1 {
                (delta, count)
            } else {
                best
            }
        });

    let frame_count = frames.len();
    TimingProfile {
        dominant_delta,
        consistency: if frame_count == 0 {
            0.0
        } else {
            dominant_count as f64 / frame_count as f64
        },
        fast_moves,
        fast_average: if fast_moves == 0 {
            0.0
        } else {
            fast_total / fast_moves as f64
        },
        frame_count,
    }
}

pub fn evaluate(replay: &Replay, ctx: &AnalysisContext<'_>) -> Result<Option<Flag>, DetectorError> {
    let profile = profile(&replay.frames);
    let fast_average = finite("average velocity", profile.fast_average)?;

    ctx.note(
        DetectionKind::TimewarpOrSpeedhack,
        &format!(
            "dominant delta={}ms consistency={:.3} fast moves={} avg={:.2}px/ms",
            profile.dominant_delta, profile.consistency, profile.fast_moves, fast_average
        ),
    );

    let reason = if profile.is_uniform() {
        format!(
            "{:.1}% of frames exactly {}ms apart",
            profile.consistency * 100.0,
            profile.dominant_delta
        )
    } else if profile.is_too_fast() {
        format!(
            "{} of {} moves faster than {}px/ms (average {:.2}px/ms)",
            profile.fast_moves, profile.frame_count, FAST_VELOCITY, fast_average
        )
    } else {
        return Ok(None);
    };

    Ok(Some(Flag::new(DetectionKind::TimewarpOrSpeedhack, reason)))
}
