//! Score ceiling check
//!
//! The header's judgement counters and max combo bound the score a play can
//! legitimately reach. A reported score above that bound (plus 5% slack for
//! rounding and scoring-version drift) cannot come from the game client.

use super::{finite, AnalysisContext, DetectionKind, DetectorError, Flag};
use crate::mods;
use crate::replay::{GameMode, Replay};

/// Allowed overshoot above the computed maximum
const SCORE_TOLERANCE: f64 = 1.05;

/// Unranked plays have a zero multiplier; anything above this is suspicious
const UNRANKED_SCORE_LIMIT: f64 = 1000.0;

/// Any judged object, or a score that is negative outright
pub fn applicable(replay: &Replay) -> bool {
    replay.hits.total_hits() > 0 || replay.total_score < 0
}

/// Score reachable from the counters before mods are applied
pub fn base_score(replay: &Replay) -> f64 {
    let hits = &replay.hits;
    let great = f64::from(hits.great);
    let good = f64::from(hits.good);
    let meh = f64::from(hits.meh);
    let combo = f64::from(replay.max_combo).max(1.0);

    match replay.mode {
        GameMode::Standard | GameMode::Catch => (300.0 * great + 100.0 * good + 50.0 * meh) * combo,
        GameMode::Taiko => (300.0 * great + 150.0 * good) * combo,
        GameMode::Mania => {
            300.0 * f64::from(hits.geki)
                + 300.0 * great
                + 200.0 * f64::from(hits.katu)
                + 100.0 * good
                + 50.0 * meh
        }
    }
}

/// Theoretical maximum including the mod multiplier
pub fn max_possible_score(replay: &Replay) -> f64 {
    base_score(replay) * mods::multiplier(replay.mods)
}

pub fn evaluate(replay: &Replay, ctx: &AnalysisContext<'_>) -> Result<Option<Flag>, DetectorError> {
    let score = replay.total_score;
    let max = finite("maximum score", max_possible_score(replay))?;
    let unranked = mods::is_unranked(replay.mods);

    ctx.note(
        DetectionKind::TooHighScore,
        &format!(
            "score={} max={:.0} multiplier={} mods={}",
            score,
            max,
            mods::multiplier(replay.mods),
            replay.mods_string()
        ),
    );

    let reason = if score < 0 {
        Some(format!("negative score {}", score))
    } else if unranked {
        (f64::from(score) > UNRANKED_SCORE_LIMIT).then(|| {
            format!(
                "score {} with unranked mods {} (limit {})",
                score,
                replay.mods_string(),
                UNRANKED_SCORE_LIMIT
            )
        })
    } else {
        (f64::from(score) > max * SCORE_TOLERANCE).then(|| {
            format!(
                "score {} exceeds theoretical maximum {:.0} for +{}",
                score,
                max,
                replay.mods_string()
            )
        })
    };

    Ok(reason.map(|r| Flag::new(DetectionKind::TooHighScore, r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::testing::encoded;
    use crate::replay::HitCounts;

    fn play(mode: GameMode, hits: HitCounts, combo: i16, score: i32, mods: u32) -> Replay {
        encoded(Replay {
            mode,
            beatmap_hash: "beatmap".to_string(),
            replay_hash: "replay".to_string(),
            hits,
            max_combo: combo,
            total_score: score,
            mods,
            ..Replay::default()
        })
    }

    fn greats(great: i16) -> HitCounts {
        HitCounts {
            great,
            ..HitCounts::default()
        }
    }

    fn check(replay: &Replay) -> Option<Flag> {
        evaluate(replay, &AnalysisContext::detached()).unwrap()
    }

    // ==========================================================================
    // STANDARD MODE
    // ==========================================================================

    #[test]
    fn test_impossible_standard_score_is_flagged() {
        // 10 greats at 1000x combo cap out at 3,000,000
        let replay = play(GameMode::Standard, greats(10), 1000, 3_200_000, 0);
        assert_eq!(max_possible_score(&replay), 3_000_000.0);

        let flag = check(&replay).expect("3.2M is above 3.0M * 1.05");
        assert_eq!(flag.kind, DetectionKind::TooHighScore);
        assert!(flag.reason.contains("3200000"), "{}", flag.reason);
    }

    #[test]
    fn test_hundred_combo_full_greats() {
        // 100 greats at 100x combo cap out at 3,000,000; the allowance ends at 3,150,000
        let replay = play(GameMode::Standard, greats(100), 100, 3_200_000, 0);
        assert_eq!(max_possible_score(&replay), 3_000_000.0);
        let flag = check(&replay).expect("3.2M is above the 3.15M allowance");
        assert_eq!(flag.kind, DetectionKind::TooHighScore);

        let honest = play(GameMode::Standard, greats(100), 100, 3_000_000, 0);
        assert!(check(&honest).is_none());
    }

    #[test]
    fn test_score_within_tolerance_passes() {
        // 3,150,000 is exactly max * 1.05
        let replay = play(GameMode::Standard, greats(10), 1000, 3_150_000, 0);
        assert!(check(&replay).is_none());
    }

    #[test]
    fn test_mods_raise_the_ceiling() {
        let nomod = play(GameMode::Standard, greats(10), 1000, 3_300_000, 0);
        assert!(check(&nomod).is_some());

        // HDHR lifts the ceiling to about 3.37M
        let hdhr = play(GameMode::Standard, greats(10), 1000, 3_300_000, 8 | 16);
        assert!(check(&hdhr).is_none());
    }

    #[test]
    fn test_zero_combo_counts_as_one() {
        let replay = play(GameMode::Standard, greats(2), 0, 600, 0);
        assert_eq!(base_score(&replay), 600.0);
        assert!(check(&replay).is_none());
    }

    // ==========================================================================
    // UNRANKED AND NEGATIVE
    // ==========================================================================

    #[test]
    fn test_unranked_mods_allow_only_small_scores() {
        let relax_small = play(GameMode::Standard, greats(10), 10, 1_000, 128);
        assert!(check(&relax_small).is_none());

        let relax_big = play(GameMode::Standard, greats(10), 10, 1_001, 128);
        let flag = check(&relax_big).unwrap();
        assert!(flag.reason.contains("RX"), "{}", flag.reason);
    }

    #[test]
    fn test_negative_score_always_flags() {
        let replay = play(GameMode::Standard, HitCounts::default(), 0, -1, 0);
        assert!(applicable(&replay));
        assert!(check(&replay).is_some());
    }

    #[test]
    fn test_nothing_judged_is_not_applicable() {
        let replay = play(GameMode::Standard, HitCounts::default(), 0, 5_000, 0);
        assert!(!applicable(&replay));
    }

    // ==========================================================================
    // OTHER MODES
    // ==========================================================================

    #[test]
    fn test_taiko_ceiling() {
        let hits = HitCounts {
            great: 10,
            good: 4,
            ..HitCounts::default()
        };
        let replay = play(GameMode::Taiko, hits, 10, 0, 0);
        assert_eq!(base_score(&replay), (3000.0 + 600.0) * 10.0);
    }

    #[test]
    fn test_mania_ignores_combo() {
        let hits = HitCounts {
            geki: 10,
            great: 10,
            katu: 5,
            good: 2,
            meh: 1,
            miss: 0,
        };
        let replay = play(GameMode::Mania, hits, 30_000, 0, 0);
        assert_eq!(base_score(&replay), 3000.0 + 3000.0 + 1000.0 + 200.0 + 50.0);

        let over = play(GameMode::Mania, hits, 30_000, 8_000, 0);
        assert!(check(&over).is_some());
    }

    #[test]
    fn test_catch_uses_standard_formula() {
        let a = play(GameMode::Catch, greats(5), 5, 0, 0);
        let b = play(GameMode::Standard, greats(5), 5, 0, 0);
        assert_eq!(base_score(&a), base_score(&b));
    }
}
