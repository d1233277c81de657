//! Stolen replay detection
//!
//! A replay whose cursor path nearly coincides with another stored play of
//! the same beatmap was most likely copied and re-submitted. Paths are
//! compared frame by frame over their common length.

use super::{finite, AnalysisContext, DetectionKind, DetectorError, Flag};
use crate::replay::{Frame, GameMode, Replay};

/// Similarity above which two cursor paths are considered the same play
pub const SIMILARITY_THRESHOLD: f64 = 0.80;

/// Diagonal of the 512x384 playfield
const PLAYFIELD_DIAGONAL: f64 = 640.0;

pub fn applicable(replay: &Replay) -> bool {
    matches!(replay.mode, GameMode::Standard | GameMode::Catch)
}

/// Cursor path similarity in `[0, 1]`.
///
/// One minus the RMS distance between paired frames, normalised by the
/// playfield diagonal. Symmetric; 0 when either side has no frames.
pub fn cursor_similarity(a: &[Frame], b: &[Frame]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let sum_sq: f64 = a
        .iter()
        .zip(b)
        .map(|(fa, fb)| {
            let dx = f64::from(fa.x) - f64::from(fb.x);
            let dy = f64::from(fa.y) - f64::from(fb.y);
            dx * dx + dy * dy
        })
        .sum();

    let rms = (sum_sq / n as f64).sqrt();
    (1.0 - rms / PLAYFIELD_DIAGONAL).max(0.0)
}

pub fn evaluate(replay: &Replay, ctx: &AnalysisContext<'_>) -> Result<Option<Flag>, DetectorError> {
    let siblings = ctx
        .corpus
        .list_replays_for_beatmap(&replay.beatmap_hash, &replay.replay_hash)?;

    let mut matches = 0usize;
    let mut best: Option<(&Replay, f64)> = None;

    for other in siblings.iter().filter(|o| o.replay_hash != replay.replay_hash) {
        let similarity = finite("cursor similarity", cursor_similarity(&replay.frames, &other.frames))?;
        ctx.note(
            DetectionKind::ReplayStolen,
            &format!(
                "{:.4} similar to {} by {}",
                similarity, other.replay_hash, other.player_name
            ),
        );

        if similarity > SIMILARITY_THRESHOLD {
            matches += 1;
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((other, similarity));
            }
        }
    }

    Ok(best.map(|(other, similarity)| {
        Flag::new(
            DetectionKind::ReplayStolen,
            format!(
                "cursor path {:.1}% similar to replay {} by {} ({} stored replay{} above {:.0}%)",
                similarity * 100.0,
                other.replay_hash,
                if other.player_name.is_empty() { "<unknown>" } else { &other.player_name },
                matches,
                if matches == 1 { "" } else { "s" },
                SIMILARITY_THRESHOLD * 100.0
            ),
        )
    }))
}
