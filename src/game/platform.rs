//! Platform Sequence
//!
//! The infinite platform column every player climbs. Nothing about it is
//! transmitted: each peer derives `type(index)` from the session seed, so
//! the sequence is the shared ground truth that jumps are validated against.
//!
//! Seed material for index `i` is the session seed followed by `i` in
//! decimal (`"1700000000000" + "7"`), drawn through [`SeededRandom`].

use serde::{Serialize, Deserialize};

use crate::core::hash::VARIANT_DOMAIN;
use crate::core::rng::SeededRandom;

/// Pixel height of one platform sprite; one platform = one score step.
pub const PLATFORM_HEIGHT: u32 = 160;

/// Number of cosmetic sprite variants per platform type.
pub const PLATFORM_VARIANTS: u32 = 2;

/// Lane a jump must target to land on a platform.
///
/// The numeric values are part of the protocol (see
/// [`crate::PROTOCOL_VERSION`]): draws map `0 → Center, 1 → Right, 2 → Left`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PlatformType {
    /// Straight up.
    Center = 0,
    /// Right lane.
    Right = 1,
    /// Left lane.
    Left = 2,
}

impl PlatformType {
    /// Number of platform types.
    pub const COUNT: u32 = 3;

    /// Map a draw in `[0, 3)` to a platform type.
    #[inline]
    pub const fn from_draw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Center),
            1 => Some(Self::Right),
            2 => Some(Self::Left),
            _ => None,
        }
    }
}

/// A platform as seen by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Position in the column (0 = starting platform).
    pub index: u64,
    /// Lane.
    pub platform_type: PlatformType,
    /// Cosmetic sprite variant in `[0, PLATFORM_VARIANTS)`.
    pub variant: u8,
}

/// Platform type at `index` for `session_seed`.
///
/// Idempotent, side-effect free, valid for any index. Index 0 is the
/// starting platform under the character and is never a jump target; its
/// value is computed like any other but carries no meaning.
pub fn platform_type(session_seed: &str, index: u64) -> PlatformType {
    let material = seed_material(session_seed, index);
    let draw = SeededRandom::new().next_below(&material, PlatformType::COUNT);
    // next_below(_, 3) is always < 3
    PlatformType::from_draw(draw).unwrap_or(PlatformType::Center)
}

/// Concatenate seed and decimal index into one seed material string.
#[inline]
fn seed_material(session_seed: &str, index: u64) -> String {
    format!("{}{}", session_seed, index)
}

/// Score reached by standing on `index`.
#[inline]
pub fn score_for_index(index: u64) -> u64 {
    index * PLATFORM_HEIGHT as u64
}

/// Stateless view over one session's platform column.
///
/// Cheap to clone; holds only the seed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformSequence {
    seed: String,
}

impl PlatformSequence {
    /// Sequence for a session seed.
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }

    /// Session seed.
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Platform type at `index`.
    #[inline]
    pub fn platform_type(&self, index: u64) -> PlatformType {
        platform_type(&self.seed, index)
    }

    /// Full platform description at `index`.
    pub fn platform(&self, index: u64) -> Platform {
        let material = seed_material(&self.seed, index);
        let variant = SeededRandom::with_domain(VARIANT_DOMAIN)
            .next_below(&material, PLATFORM_VARIANTS) as u8;
        Platform {
            index,
            platform_type: self.platform_type(index),
            variant,
        }
    }

    /// `count` platforms starting at `start`, for drawing.
    pub fn window(&self, start: u64, count: usize) -> Vec<Platform> {
        (start..)
            .take(count)
            .map(|index| self.platform(index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use super::PlatformType::{Center, Left, Right};

    #[test]
    fn test_platform_type_determinism() {
        let first = platform_type("12345", 7);
        for _ in 0..100 {
            assert_eq!(platform_type("12345", 7), first);
        }
    }

    #[test]
    fn test_known_sequence() {
        // Regression vector: changing this is a protocol version bump.
        let expected = [
            Left, Right, Left, Right, Left, Left, Right, Left, Center, Left,
            Left, Right, Left, Right, Center, Left, Right, Center, Left, Center,
            Left,
        ];
        let sequence = PlatformSequence::new("12345");
        let actual: Vec<_> = (0..=20).map(|i| sequence.platform_type(i)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_independent_sequences_agree() {
        let a = PlatformSequence::new("1700000000000");
        let b = PlatformSequence::new(String::from("1700000000000"));
        for index in 0..=50 {
            assert_eq!(a.platform(index), b.platform(index));
        }
    }

    #[test]
    fn test_draw_mapping_is_fixed() {
        assert_eq!(PlatformType::from_draw(0), Some(Center));
        assert_eq!(PlatformType::from_draw(1), Some(Right));
        assert_eq!(PlatformType::from_draw(2), Some(Left));
        assert_eq!(PlatformType::from_draw(3), None);
        assert_eq!(Right as u8, 1);
    }

    #[test]
    fn test_start_platform_is_computable() {
        // Index 0 is never a jump target but must still be well defined.
        let sequence = PlatformSequence::new("12345");
        assert_eq!(sequence.platform_type(0), sequence.platform_type(0));
        assert_eq!(sequence.window(0, 1)[0].index, 0);
    }

    #[test]
    fn test_window() {
        let sequence = PlatformSequence::new("abc");
        let window = sequence.window(10, 5);
        assert_eq!(window.len(), 5);
        for (offset, platform) in window.iter().enumerate() {
            assert_eq!(platform.index, 10 + offset as u64);
            assert_eq!(platform.platform_type, sequence.platform_type(platform.index));
            assert!((platform.variant as u32) < PLATFORM_VARIANTS);
        }
    }

    #[test]
    fn test_very_large_index() {
        let sequence = PlatformSequence::new("abc");
        assert_eq!(sequence.platform_type(u64::MAX), sequence.platform_type(u64::MAX));
    }

    #[test]
    fn test_all_types_appear() {
        let sequence = PlatformSequence::new("coverage");
        let types: std::collections::BTreeSet<_> =
            (1..200).map(|i| sequence.platform_type(i)).collect();
        assert_eq!(types.len(), 3);
    }

    #[test]
    fn test_score_for_index() {
        assert_eq!(score_for_index(0), 0);
        assert_eq!(score_for_index(3), 480);
    }

    proptest! {
        #[test]
        fn prop_platform_type_is_pure(seed in "[0-9a-z]{0,16}", index in 0u64..10_000) {
            let a = PlatformSequence::new(seed.clone());
            let b = PlatformSequence::new(seed);
            prop_assert_eq!(a.platform(index), b.platform(index));
        }
    }
}
