//! Full-autoplay detection
//!
//! Autoplay bots hit everything perfectly and either press with machine
//! regularity or teleport between objects. A play is flagged only when its
//! accuracy is near-perfect and at least one of the behavioural signs shows.

use super::{finite, AnalysisContext, DetectionKind, DetectorError, Flag};
use crate::replay::{Frame, GameMode, Replay};

const MIN_FRAMES: usize = 100;
const MIN_ACCURACY: f64 = 0.999;

/// Consecutive deltas differing by at most this many ms count as identical
const IDENTICAL_DELTA_MS: u64 = 1;
const IDENTICAL_RATIO_THRESHOLD: f64 = 0.8;
const STDDEV_THRESHOLD_MS: f64 = 5.0;

/// A cursor move longer than this between two frames is not humanly aimed
const JUMP_DISTANCE: f64 = 450.0;
const MIN_JUMPS: usize = 3;

pub fn applicable(replay: &Replay) -> bool {
    replay.mode == GameMode::Standard
        && replay.frames.len() >= MIN_FRAMES
        && replay.hits.total_hits() > 0
}

/// Regularity of frame timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingStats {
    /// Share of deltas within 1ms of the previous delta
    pub identical_ratio: f64,
    /// Population standard deviation of the deltas, ms
    pub stddev_ms: f64,
    pub samples: usize,
}

impl TimingStats {
    pub fn is_robotic(&self) -> bool {
        self.identical_ratio > IDENTICAL_RATIO_THRESHOLD && self.stddev_ms < STDDEV_THRESHOLD_MS
    }
}

/// Timing statistics over the deltas from the third frame on.
///
/// The first frame is a positional placeholder and the second sets the
/// baseline delta. `None` when fewer than three frames exist.
pub fn timing_stats(frames: &[Frame]) -> Option<TimingStats> {
    if frames.len() < 3 {
        return None;
    }

    let mut identical = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for pair in frames[1..].windows(2) {
        let (prev, delta) = (pair[0].time_delta, pair[1].time_delta);
        if delta.abs_diff(prev) <= IDENTICAL_DELTA_MS {
            identical += 1;
        }
        let d = delta as f64;
        sum += d;
        sum_sq += d * d;
    }

    let samples = frames.len() - 2;
    let n = samples as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);

    Some(TimingStats {
        identical_ratio: identical as f64 / n,
        stddev_ms: variance.sqrt(),
        samples,
    })
}

/// Adjacent frame pairs whose cursor moved more than 450px, anywhere in the replay
pub fn count_jumps(frames: &[Frame]) -> usize {
    frames
        .windows(2)
        .filter(|pair| pair[0].distance_to(&pair[1]) > JUMP_DISTANCE)
        .count()
}

pub fn evaluate(replay: &Replay, ctx: &AnalysisContext<'_>) -> Result<Option<Flag>, DetectorError> {
    let accuracy = finite("accuracy", replay.accuracy())?;
    let perfect = replay.hits.miss == 0 && accuracy >= MIN_ACCURACY;

    let timing = timing_stats(&replay.frames);
    let jumps = count_jumps(&replay.frames);

    let robotic = match timing {
        Some(stats) => {
            finite("timing deviation", stats.stddev_ms)?;
            ctx.note(
                DetectionKind::Autoplay,
                &format!(
                    "accuracy={:.4} misses={} identical={:.3} stddev={:.2}ms jumps={}",
                    accuracy, replay.hits.miss, stats.identical_ratio, stats.stddev_ms, jumps
                ),
            );
            stats.is_robotic()
        }
        None => false,
    };
    let teleporting = jumps >= MIN_JUMPS;

    if !perfect || !(robotic || teleporting) {
        return Ok(None);
    }

    let mut signs = Vec::new();
    if let Some(stats) = timing.filter(|_| robotic) {
        signs.push(format!(
            "{:.0}% identical frame timing (stddev {:.2}ms)",
            stats.identical_ratio * 100.0,
            stats.stddev_ms
        ));
    }
    if teleporting {
        signs.push(format!("{} frame-to-frame jumps over {:.0}px", jumps, JUMP_DISTANCE));
    }

    Ok(Some(Flag::new(
        DetectionKind::Autoplay,
        format!(
            "{:.2}% accuracy with no misses and {}",
            accuracy * 100.0,
            signs.join(" and ")
        ),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::testing::{encoded, standard_replay, steady_frames};
    use crate::replay::HitCounts;

    fn perfect_play(frames: Vec<Frame>) -> Replay {
        encoded(Replay {
            hits: HitCounts {
                great: 800,
                ..HitCounts::default()
            },
            max_combo: 1200,
            total_score: 10_000,
            ..standard_replay(frames)
        })
    }

    /// Human-like timing: deltas wander between 8 and 25ms
    fn human_frames(count: usize) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                let delta = 8 + ((i * 7) % 18) as i64;
                Frame::new(delta, 200.0 + (i % 50) as f32, 150.0 + (i % 30) as f32, 1)
            })
            .collect()
    }

    fn check(replay: &Replay) -> Option<Flag> {
        evaluate(replay, &AnalysisContext::detached()).unwrap()
    }

    // ==========================================================================
    // METRICS
    // ==========================================================================

    #[test]
    fn test_constant_timing_is_robotic() {
        let stats = timing_stats(&steady_frames(150, 16, 100.0, 100.0)).unwrap();
        assert_eq!(stats.identical_ratio, 1.0);
        assert_eq!(stats.stddev_ms, 0.0);
        assert_eq!(stats.samples, 148);
        assert!(stats.is_robotic());
    }

    #[test]
    fn test_varied_timing_is_not_robotic() {
        let stats = timing_stats(&human_frames(150)).unwrap();
        assert!(stats.identical_ratio < 0.2, "ratio {}", stats.identical_ratio);
        assert!(!stats.is_robotic());
    }

    #[test]
    fn test_too_few_frames_for_timing() {
        assert!(timing_stats(&steady_frames(2, 16, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_jump_count() {
        let frames = vec![
            Frame::new(16, 0.0, 0.0, 0),
            Frame::new(16, 500.0, 0.0, 0),
            Frame::new(16, 0.0, 0.0, 0),
            Frame::new(16, 10.0, 0.0, 0),
            Frame::new(16, 510.0, 0.0, 0),
            Frame::new(16, 0.0, 0.0, 0),
            Frame::new(16, 500.0, 10.0, 0),
        ];
        // 0->1, 1->2, 3->4, 4->5 and 5->6; the 10px step between runs is not a jump
        assert_eq!(count_jumps(&frames), 5);
        assert_eq!(count_jumps(&frames[..1]), 0);
        assert_eq!(count_jumps(&[]), 0);
    }

    // ==========================================================================
    // DETECTION
    // ==========================================================================

    #[test]
    fn test_perfect_play_with_robotic_timing() {
        let replay = perfect_play(steady_frames(150, 16, 100.0, 100.0));
        assert!(applicable(&replay));
        let flag = check(&replay).expect("robotic timing at 100% accuracy");
        assert_eq!(flag.kind, DetectionKind::Autoplay);
        assert!(flag.reason.contains("identical frame timing"), "{}", flag.reason);
    }

    #[test]
    fn test_perfect_play_with_teleports() {
        let mut frames = human_frames(150);
        frames[60] = Frame::new(12, 20.0, 20.0, 1);
        frames[61] = Frame::new(12, 500.0, 370.0, 1);
        frames[62] = Frame::new(12, 20.0, 20.0, 1);
        frames[63] = Frame::new(12, 500.0, 370.0, 1);
        let replay = perfect_play(frames);

        let flag = check(&replay).expect("three back-to-back jumps");
        assert!(flag.reason.contains("frame-to-frame jumps"), "{}", flag.reason);
    }

    #[test]
    fn test_perfect_play_with_separated_teleports() {
        // One isolated jump at a time, far apart from each other
        let mut frames = human_frames(150);
        for at in [40, 80, 120] {
            frames[at] = Frame::new(12, 700.0, 500.0, 1);
        }
        // Every spike is a jump out and a jump back
        let replay = perfect_play(frames.clone());
        assert_eq!(count_jumps(&frames), 6);

        let flag = check(&replay).expect("three separate jumps at 100% accuracy");
        assert_eq!(flag.kind, DetectionKind::Autoplay);
        assert!(flag.reason.contains("6 frame-to-frame jumps"), "{}", flag.reason);
    }

    #[test]
    fn test_two_jumps_are_not_enough() {
        let mut frames = human_frames(150);
        frames[75] = Frame::new(12, 700.0, 500.0, 1);
        assert_eq!(count_jumps(&frames), 2);
        assert!(check(&perfect_play(frames)).is_none());
    }

    #[test]
    fn test_perfect_human_play_passes() {
        let replay = perfect_play(human_frames(150));
        assert!(check(&replay).is_none());
    }

    #[test]
    fn test_a_single_miss_clears_the_play() {
        let replay = encoded(Replay {
            hits: HitCounts {
                great: 800,
                miss: 1,
                ..HitCounts::default()
            },
            ..standard_replay(steady_frames(150, 16, 100.0, 100.0))
        });
        assert!(check(&replay).is_none());
    }

    #[test]
    fn test_applicability() {
        assert!(!applicable(&perfect_play(steady_frames(99, 16, 0.0, 0.0))));
        assert!(applicable(&perfect_play(steady_frames(100, 16, 0.0, 0.0))));

        let mut taiko = perfect_play(steady_frames(150, 16, 0.0, 0.0));
        taiko.mode = GameMode::Taiko;
        assert!(!applicable(&taiko));

        let mut nothing_hit = perfect_play(steady_frames(150, 16, 0.0, 0.0));
        nothing_hit.hits = HitCounts::default();
        assert!(!applicable(&nothing_hit));
    }
}
