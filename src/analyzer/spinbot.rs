//! Spinbot detection
//!
//! A frame is "spinning" while the cursor sits more than 40px from the
//! playfield centre. Consecutive spinning frames form a segment; the angle
//! the cursor sweeps around the centre over the segment gives its spin rate.
//! Humans top out well below 500 spins per minute on a sustained spin.
//!
//! The first frame is the client's positional placeholder and is skipped,
//! along with its time delta.

use super::{finite, AnalysisContext, DetectionKind, DetectorError, Flag};
use crate::replay::{Frame, GameMode, Replay};
use std::f64::consts::{PI, TAU};

const CENTER_X: f64 = 256.0;
const CENTER_Y: f64 = 192.0;

/// Minimum distance from centre for a frame to count as spinning
const MIN_RADIUS: f64 = 40.0;

/// Segments shorter than this are ignored
const MIN_SEGMENT_MS: i64 = 300;

/// Spins per minute above which a segment is flagged
pub const SPM_THRESHOLD: f64 = 500.0;

pub fn applicable(replay: &Replay) -> bool {
    matches!(replay.mode, GameMode::Standard | GameMode::Catch)
}

/// A maximal run of spinning frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinSegment {
    /// Absolute time of the first frame in the run
    pub start_ms: i64,
    /// Absolute time of the last frame in the run
    pub end_ms: i64,
    /// Sum of absolute angle changes, radians
    pub total_angle: f64,
}

impl SpinSegment {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn rotations(&self) -> f64 {
        self.total_angle / TAU
    }

    /// Spins per minute, `None` for zero or negative duration
    pub fn spm(&self) -> Option<f64> {
        let duration = self.duration_ms();
        if duration <= 0 {
            return None;
        }
        Some(self.rotations() / (duration as f64 / 60_000.0))
    }
}

struct OpenSegment {
    start_ms: i64,
    end_ms: i64,
    last_angle: f64,
    total_angle: f64,
}

impl OpenSegment {
    fn close(self) -> SpinSegment {
        SpinSegment {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            total_angle: self.total_angle,
        }
    }
}

/// Lazily splits a frame sequence into spin segments, from the second frame on
pub struct SpinSegments<'a> {
    frames: std::slice::Iter<'a, Frame>,
    elapsed_ms: i64,
    open: Option<OpenSegment>,
}

impl<'a> SpinSegments<'a> {
    pub fn new(frames: &'a [Frame]) -> Self {
        Self {
            frames: frames.get(1..).unwrap_or_default().iter(),
            elapsed_ms: 0,
            open: None,
        }
    }
}

impl Iterator for SpinSegments<'_> {
    type Item = SpinSegment;

    fn next(&mut self) -> Option<SpinSegment> {
        for frame in self.frames.by_ref() {
            self.elapsed_ms = self.elapsed_ms.saturating_add(frame.time_delta);

            let dx = f64::from(frame.x) - CENTER_X;
            let dy = f64::from(frame.y) - CENTER_Y;

            if dx.hypot(dy) > MIN_RADIUS {
                let angle = dy.atan2(dx);
                match self.open.as_mut() {
                    Some(seg) => {
                        seg.total_angle += wrap_angle(angle - seg.last_angle).abs();
                        seg.last_angle = angle;
                        seg.end_ms = self.elapsed_ms;
                    }
                    None => {
                        self.open = Some(OpenSegment {
                            start_ms: self.elapsed_ms,
                            end_ms: self.elapsed_ms,
                            last_angle: angle,
                            total_angle: 0.0,
                        });
                    }
                }
            } else if let Some(seg) = self.open.take() {
                return Some(seg.close());
            }
        }

        // A spin still running at the end of the replay counts too
        self.open.take().map(OpenSegment::close)
    }
}

/// Fold an angle difference into (-π, π]
fn wrap_angle(mut delta: f64) -> f64 {
    while delta > PI {
        delta -= TAU;
    }
    while delta <= -PI {
        delta += TAU;
    }
    delta
}

/// Long enough segments with their spin rate, in replay order
pub fn measured_segments(frames: &[Frame]) -> impl Iterator<Item = (SpinSegment, f64)> + '_ {
    SpinSegments::new(frames)
        .filter(|seg| seg.duration_ms() >= MIN_SEGMENT_MS)
        .filter_map(|seg| seg.spm().map(|spm| (seg, spm)))
}

pub fn evaluate(replay: &Replay, ctx: &AnalysisContext<'_>) -> Result<Option<Flag>, DetectorError> {
    for (segment, spm) in measured_segments(&replay.frames) {
        let spm = finite("spins per minute", spm)?;
        ctx.note(
            DetectionKind::SpinbotDetected,
            &format!(
                "segment {}..{}ms: {:.1} rotations, {:.0} spm",
                segment.start_ms,
                segment.end_ms,
                segment.rotations(),
                spm
            ),
        );

        if spm > SPM_THRESHOLD {
            return Ok(Some(Flag::new(
                DetectionKind::SpinbotDetected,
                format!(
                    "spun at {:.0} spm for {}ms starting at {}ms (limit {:.0})",
                    spm,
                    segment.duration_ms(),
                    segment.start_ms,
                    SPM_THRESHOLD
                ),
            )));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::testing::{circling_frames, standard_replay};

    fn check(frames: Vec<Frame>) -> Option<Flag> {
        let replay = standard_replay(frames);
        evaluate(&replay, &AnalysisContext::detached()).unwrap()
    }

    // ==========================================================================
    // SEGMENTATION
    // ==========================================================================

    #[test]
    fn test_angle_wrapping() {
        assert!((wrap_angle(1.5 * PI) - (-0.5 * PI)).abs() < 1e-12);
        assert!((wrap_angle(-1.5 * PI) - 0.5 * PI).abs() < 1e-12);
        assert_eq!(wrap_angle(PI), PI);
        assert_eq!(wrap_angle(-PI), PI);
    }

    #[test]
    fn test_center_frames_split_segments() {
        let mut frames = circling_frames(10, 10, 100.0, 30.0);
        frames.push(Frame::new(10, 256.0, 192.0, 0));
        frames.extend(circling_frames(5, 10, 100.0, 30.0));

        let segments: Vec<_> = SpinSegments::new(&frames).collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_ms, 10);
        assert_eq!(segments[0].end_ms, 90);
        assert!((segments[0].rotations() - 8.0 / 12.0).abs() < 1e-4);
        assert_eq!(segments[1].start_ms, 110);
        assert_eq!(segments[1].end_ms, 150);
    }

    #[test]
    fn test_single_frame_segment_has_no_rate() {
        let frames = vec![Frame::new(0, 256.0, -500.0, 0), Frame::new(10, 400.0, 192.0, 0)];
        let segments: Vec<_> = SpinSegments::new(&frames).collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].spm(), None);
    }

    // ==========================================================================
    // DETECTION
    // ==========================================================================

    #[test]
    fn test_ten_rotations_in_600ms_is_flagged() {
        // 60 steps of 60 degrees = 10 rotations, 10ms apart -> 600ms
        let frames = circling_frames(61, 10, 100.0, 60.0);
        let flag = check(frames).expect("1000 spm must be flagged");
        assert_eq!(flag.kind, DetectionKind::SpinbotDetected);
    }

    #[test]
    fn test_ten_rotations_in_5000ms_is_human() {
        // Same path stretched to 5 seconds -> 120 spm
        let frames = circling_frames(61, 83, 100.0, 60.0);
        assert_eq!(measured_segments(&frames).count(), 1);
        assert!(check(frames).is_none());
    }

    #[test]
    fn test_placeholder_frame_is_skipped() {
        // The client's leading 0|256|-500 record sits far outside the dead zone
        let mut frames = vec![Frame::new(0, 256.0, -500.0, 0)];
        frames.push(Frame::new(10, 256.0, 192.0, 0));
        frames.extend(circling_frames(5, 10, 100.0, 30.0));

        let segments: Vec<_> = SpinSegments::new(&frames).collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_ms, 20);
    }

    #[test]
    fn test_exactly_300ms_qualifies() {
        // 30 steps of 90 degrees over 300ms -> 1500 spm
        let frames = circling_frames(32, 10, 100.0, 90.0);
        let measured: Vec<_> = measured_segments(&frames).collect();
        assert_eq!(measured.len(), 1);
        assert_eq!(measured[0].0.duration_ms(), 300);
        assert!((measured[0].1 - 1500.0).abs() < 0.01, "spm {}", measured[0].1);
        assert!(check(frames).is_some(), "a full 300ms segment must be measured");
    }

    #[test]
    fn test_short_bursts_are_ignored() {
        // 290ms of very fast spinning does not qualify
        let frames = circling_frames(31, 10, 100.0, 90.0);
        assert_eq!(measured_segments(&frames).count(), 0);
        assert!(check(frames).is_none());
    }

    #[test]
    fn test_spinning_inside_dead_zone_is_ignored() {
        let frames = circling_frames(200, 10, 30.0, 60.0);
        assert_eq!(SpinSegments::new(&frames).count(), 0);
        assert!(check(frames).is_none());
    }

    #[test]
    fn test_modes_without_spinners() {
        let mut replay = standard_replay(Vec::new());
        assert!(applicable(&replay));
        replay.mode = GameMode::Catch;
        assert!(applicable(&replay));
        replay.mode = GameMode::Taiko;
        assert!(!applicable(&replay));
        replay.mode = GameMode::Mania;
        assert!(!applicable(&replay));
    }
}
