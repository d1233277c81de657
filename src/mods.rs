//! Gameplay mods and their score multipliers

use bitflags::bitflags;

bitflags! {
    /// Mods bitmask as stored in the replay header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mods: u32 {
        const NO_FAIL = 1;
        const EASY = 2;
        const TOUCH_DEVICE = 4;
        const HIDDEN = 8;
        const HARD_ROCK = 16;
        const SUDDEN_DEATH = 32;
        const DOUBLE_TIME = 64;
        const RELAX = 128;
        const HALF_TIME = 256;
        const NIGHTCORE = 512;
        const FLASHLIGHT = 1024;
        const AUTOPLAY = 2048;
        const SPUN_OUT = 4096;
        const AUTOPILOT = 8192;
        const PERFECT = 16384;
        const CINEMA = 4_194_304;
    }
}

/// Mods that make a play unranked; any of them zeroes the multiplier
pub const UNRANKED: Mods = Mods::RELAX
    .union(Mods::AUTOPLAY)
    .union(Mods::AUTOPILOT)
    .union(Mods::CINEMA);

/// Score multipliers, applied in this order
const MULTIPLIERS: [(Mods, f64); 8] = [
    (Mods::NO_FAIL, 0.5),
    (Mods::EASY, 0.5),
    (Mods::HALF_TIME, 0.3),
    (Mods::HIDDEN, 1.06),
    (Mods::HARD_ROCK, 1.06),
    (Mods::DOUBLE_TIME, 1.12),
    (Mods::FLASHLIGHT, 1.12),
    (Mods::SPUN_OUT, 0.9),
];

const ACRONYMS: [(Mods, &str); 16] = [
    (Mods::NO_FAIL, "NF"),
    (Mods::EASY, "EZ"),
    (Mods::TOUCH_DEVICE, "TD"),
    (Mods::HIDDEN, "HD"),
    (Mods::HARD_ROCK, "HR"),
    (Mods::SUDDEN_DEATH, "SD"),
    (Mods::DOUBLE_TIME, "DT"),
    (Mods::RELAX, "RX"),
    (Mods::HALF_TIME, "HT"),
    (Mods::NIGHTCORE, "NC"),
    (Mods::FLASHLIGHT, "FL"),
    (Mods::AUTOPLAY, "AT"),
    (Mods::SPUN_OUT, "SO"),
    (Mods::AUTOPILOT, "AP"),
    (Mods::PERFECT, "PF"),
    (Mods::CINEMA, "CN"),
];

pub fn is_unranked(mods: u32) -> bool {
    Mods::from_bits_retain(mods).intersects(UNRANKED)
}

/// Combined score multiplier for a mods bitmask.
///
/// 0.0 for unranked combinations. Bits without a scoring effect
/// (TD, SD, NC, PF and unknown bits) leave the multiplier unchanged.
pub fn multiplier(mods: u32) -> f64 {
    if is_unranked(mods) {
        return 0.0;
    }
    let mods = Mods::from_bits_retain(mods);
    MULTIPLIERS
        .iter()
        .filter(|(flag, _)| mods.contains(*flag))
        .fold(1.0, |acc, (_, factor)| acc * factor)
}

pub fn is_difficulty_increasing(mods: u32) -> bool {
    Mods::from_bits_retain(mods).intersects(
        Mods::HIDDEN
            | Mods::HARD_ROCK
            | Mods::DOUBLE_TIME
            | Mods::FLASHLIGHT
            | Mods::SUDDEN_DEATH
            | Mods::PERFECT,
    )
}

pub fn is_difficulty_reducing(mods: u32) -> bool {
    Mods::from_bits_retain(mods)
        .intersects(Mods::NO_FAIL | Mods::EASY | Mods::HALF_TIME | Mods::SPUN_OUT)
}

/// Short display form, e.g. `HDDT`. NC hides DT and PF hides SD.
/// `NM` when no mods are set.
pub fn mods_string(mods: u32) -> String {
    let mods = Mods::from_bits_retain(mods);
    let out: String = ACRONYMS
        .iter()
        .filter(|(flag, _)| mods.contains(*flag))
        .filter(|(flag, _)| {
            !(*flag == Mods::DOUBLE_TIME && mods.contains(Mods::NIGHTCORE)
                || *flag == Mods::SUDDEN_DEATH && mods.contains(Mods::PERFECT))
        })
        .map(|(_, acronym)| *acronym)
        .collect();

    if out.is_empty() {
        "NM".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_mods_is_neutral() {
        assert_eq!(multiplier(0), 1.0);
    }

    #[test]
    fn test_hidden_hard_rock() {
        assert_eq!(multiplier(8 | 16), 1.06 * 1.06);
    }

    #[test]
    fn test_unranked_mods_zero_everything() {
        assert_eq!(multiplier(128), 0.0);
        assert_eq!(multiplier(2048), 0.0);
        assert_eq!(multiplier(8192 | 8 | 64), 0.0);
        assert_eq!(multiplier(4_194_304), 0.0);
        assert!(is_unranked(128 | 16));
        assert!(!is_unranked(8 | 16 | 64));
    }

    #[test]
    fn test_mods_without_score_effect() {
        for bits in [4, 32, 512, 16384, 4 | 32 | 512 | 16384] {
            assert_eq!(multiplier(bits), 1.0, "bits {}", bits);
        }
        // Unknown high bits are ignored
        assert_eq!(multiplier(1 << 30), 1.0);
    }

    #[test]
    fn test_full_stack_uses_fixed_order() {
        let all = 1 | 2 | 256 | 8 | 16 | 64 | 1024 | 4096;
        let expected = 0.5 * 0.5 * 0.3 * 1.06 * 1.06 * 1.12 * 1.12 * 0.9;
        assert_eq!(multiplier(all), expected);
    }

    #[test]
    fn test_multiplier_independent_of_flag_order() {
        let bits = 1 | 8 | 16 | 64 | 256 | 1024 | 4096;
        let set = Mods::from_bits_retain(bits);
        let mut factors: Vec<f64> = MULTIPLIERS
            .iter()
            .filter(|(flag, _)| set.contains(*flag))
            .map(|(_, factor)| *factor)
            .collect();
        assert_eq!(factors.len(), 7);

        let product = |fs: &[f64]| fs.iter().fold(1.0, |acc, f| acc * f);
        let expected = multiplier(bits);
        for _ in 0..factors.len() {
            factors.rotate_left(1);
            assert!((product(&factors) - expected).abs() < 1e-12, "{:?}", factors);
            let reversed: Vec<f64> = factors.iter().rev().copied().collect();
            assert!((product(&reversed) - expected).abs() < 1e-12, "{:?}", reversed);
        }
    }

    #[test]
    fn test_difficulty_classification() {
        assert!(is_difficulty_increasing(Mods::HIDDEN.bits()));
        assert!(is_difficulty_increasing(Mods::SUDDEN_DEATH.bits()));
        assert!(!is_difficulty_increasing(Mods::NIGHTCORE.bits()));
        assert!(!is_difficulty_increasing(Mods::NO_FAIL.bits()));
        assert!(is_difficulty_reducing(Mods::EASY.bits() | Mods::HIDDEN.bits()));
        assert!(!is_difficulty_reducing(0));
    }

    #[test]
    fn test_mods_string() {
        assert_eq!(mods_string(0), "NM");
        assert_eq!(mods_string(8 | 16), "HDHR");
        assert_eq!(mods_string(64 | 512 | 8), "HDNC");
        assert_eq!(mods_string(32 | 16384), "PF");
        assert_eq!(mods_string(1 | 128), "NFRX");
    }
}
