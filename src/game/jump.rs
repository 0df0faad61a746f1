//! Jump Validation
//!
//! A jump succeeds iff its direction matches the lane of the next platform.
//! [`attempt_jump`] is the pure rule; [`JumpController`] wraps it with the
//! per-character `Idle`/`Jumping` state, miss counting and hints.

use serde::{Serialize, Deserialize};

use crate::core::clock::EpochMillis;
use crate::game::platform::{score_for_index, PlatformSequence, PlatformType};

/// Successful jump motion duration (ms).
pub const JUMP_SUCCESS_DURATION_MS: i64 = 250;

/// Failed jump motion duration (ms).
pub const JUMP_FAIL_DURATION_MS: i64 = 500;

/// Consecutive misses before the next lane is hinted.
pub const MISSES_BEFORE_HINT: u32 = 3;

/// Directional jump input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Jump to the left lane.
    Left,
    /// Jump straight up (center lane).
    Up,
    /// Jump to the right lane.
    Right,
}

impl Direction {
    /// Key code for the left arrow.
    pub const KEY_LEFT: u32 = 37;
    /// Key code for the up arrow.
    pub const KEY_UP: u32 = 38;
    /// Key code for the right arrow.
    pub const KEY_RIGHT: u32 = 39;

    /// Map a keyboard key code to a direction. Other keys are not inputs.
    pub fn from_key_code(code: u32) -> Option<Self> {
        match code {
            Self::KEY_LEFT => Some(Self::Left),
            Self::KEY_UP => Some(Self::Up),
            Self::KEY_RIGHT => Some(Self::Right),
            _ => None,
        }
    }

    /// Platform lane this direction lands on.
    #[inline]
    pub fn target(self) -> PlatformType {
        match self {
            Self::Left => PlatformType::Left,
            Self::Up => PlatformType::Center,
            Self::Right => PlatformType::Right,
        }
    }

    /// Direction that lands on `platform_type`.
    #[inline]
    pub fn towards(platform_type: PlatformType) -> Self {
        match platform_type {
            PlatformType::Left => Self::Left,
            PlatformType::Center => Self::Up,
            PlatformType::Right => Self::Right,
        }
    }
}

/// Result of validating one jump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpResult {
    /// Landed on the next platform.
    Success {
        /// New platform index.
        new_index: u64,
        /// New score.
        new_score: u64,
    },
    /// Wrong lane; index and score unchanged.
    Miss,
}

/// Validate a jump from `current_index` in `direction`.
pub fn attempt_jump(
    sequence: &PlatformSequence,
    current_index: u64,
    direction: Direction,
) -> JumpResult {
    let next_index = current_index.saturating_add(1);
    if sequence.platform_type(next_index) == direction.target() {
        JumpResult::Success {
            new_index: next_index,
            new_score: score_for_index(next_index),
        }
    } else {
        JumpResult::Miss
    }
}

/// Hint shown after repeated misses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    /// Platform the hint is drawn on.
    pub platform_index: u64,
    /// Lane of that platform.
    pub platform_type: PlatformType,
}

impl Hint {
    /// Direction the player should press.
    pub fn direction(&self) -> Direction {
        Direction::towards(self.platform_type)
    }
}

/// What happened to a directional input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpOutcome {
    /// Arrived while a jump was still in motion; dropped.
    Ignored,
    /// Landed on the next platform.
    Landed {
        /// New platform index.
        platform_index: u64,
        /// New score.
        score: u64,
    },
    /// Wrong lane.
    Missed {
        /// Raised on every third consecutive miss.
        hint: Option<Hint>,
    },
}

/// Character motion state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpState {
    /// Accepts one directional input.
    Idle,
    /// In motion until the given time; inputs are ignored.
    Jumping {
        /// When the motion ends.
        until: EpochMillis,
    },
}

/// Local player's jump state for one session.
#[derive(Clone, Debug)]
pub struct JumpController {
    sequence: PlatformSequence,
    platform_index: u64,
    score: u64,
    misses: u32,
    hint: Option<Hint>,
    state: JumpState,
}

impl JumpController {
    /// Controller standing on the starting platform.
    pub fn new(sequence: PlatformSequence) -> Self {
        Self {
            sequence,
            platform_index: 0,
            score: 0,
            misses: 0,
            hint: None,
            state: JumpState::Idle,
        }
    }

    /// Current platform index.
    pub fn platform_index(&self) -> u64 {
        self.platform_index
    }

    /// Current score.
    pub fn score(&self) -> u64 {
        self.score
    }

    /// Consecutive misses since the last hint or landing.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Hint currently visible, if any.
    pub fn hint(&self) -> Option<Hint> {
        self.hint
    }

    /// Platform sequence being climbed.
    pub fn sequence(&self) -> &PlatformSequence {
        &self.sequence
    }

    /// Motion state as of `now`.
    pub fn state(&self, now: EpochMillis) -> JumpState {
        match self.state {
            JumpState::Jumping { until } if now < until => self.state,
            _ => JumpState::Idle,
        }
    }

    /// Whether a jump is still in motion at `now`.
    pub fn is_jumping(&self, now: EpochMillis) -> bool {
        matches!(self.state(now), JumpState::Jumping { .. })
    }

    /// Feed a directional input at `now`.
    pub fn jump(&mut self, direction: Direction, now: EpochMillis) -> JumpOutcome {
        if self.is_jumping(now) {
            return JumpOutcome::Ignored;
        }

        match attempt_jump(&self.sequence, self.platform_index, direction) {
            JumpResult::Success { new_index, new_score } => {
                self.platform_index = new_index;
                self.score = new_score;
                self.misses = 0;
                self.hint = None;
                self.state = JumpState::Jumping { until: now + JUMP_SUCCESS_DURATION_MS };
                JumpOutcome::Landed {
                    platform_index: new_index,
                    score: new_score,
                }
            }
            JumpResult::Miss => {
                self.misses += 1;
                self.state = JumpState::Jumping { until: now + JUMP_FAIL_DURATION_MS };
                let hint = if self.misses >= MISSES_BEFORE_HINT {
                    self.misses = 0;
                    let next = self.platform_index + 1;
                    let hint = Hint {
                        platform_index: next,
                        platform_type: self.sequence.platform_type(next),
                    };
                    self.hint = Some(hint);
                    Some(hint)
                } else {
                    None
                };
                JumpOutcome::Missed { hint }
            }
        }
    }

    /// Feed a raw key code; keys other than the arrows are ignored.
    pub fn key_down(&mut self, key_code: u32, now: EpochMillis) -> JumpOutcome {
        match Direction::from_key_code(key_code) {
            Some(direction) => self.jump(direction, now),
            None => JumpOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Seed whose platform 5 is a Right platform.
    const RIGHT_AT_FIVE: &str = "seed-4";

    fn correct(sequence: &PlatformSequence, index: u64) -> Direction {
        Direction::towards(sequence.platform_type(index + 1))
    }

    fn wrong(sequence: &PlatformSequence, index: u64) -> Direction {
        match sequence.platform_type(index + 1) {
            PlatformType::Left => Direction::Right,
            _ => Direction::Left,
        }
    }

    #[test]
    fn test_direction_targets() {
        assert_eq!(Direction::Left.target(), PlatformType::Left);
        assert_eq!(Direction::Up.target(), PlatformType::Center);
        assert_eq!(Direction::Right.target(), PlatformType::Right);
        for t in [PlatformType::Left, PlatformType::Center, PlatformType::Right] {
            assert_eq!(Direction::towards(t).target(), t);
        }
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(Direction::from_key_code(37), Some(Direction::Left));
        assert_eq!(Direction::from_key_code(38), Some(Direction::Up));
        assert_eq!(Direction::from_key_code(39), Some(Direction::Right));
        assert_eq!(Direction::from_key_code(40), None);
        assert_eq!(Direction::from_key_code(27), None);
    }

    #[test]
    fn test_miss_at_index_four() {
        let sequence = PlatformSequence::new(RIGHT_AT_FIVE);
        assert_eq!(sequence.platform_type(5), PlatformType::Right);

        assert_eq!(attempt_jump(&sequence, 4, Direction::Left), JumpResult::Miss);
        assert_eq!(
            attempt_jump(&sequence, 4, Direction::Right),
            JumpResult::Success { new_index: 5, new_score: 800 },
        );
    }

    #[test]
    fn test_jump_never_targets_start_platform() {
        let sequence = PlatformSequence::new("12345");
        let direction = correct(&sequence, 0);
        match attempt_jump(&sequence, 0, direction) {
            JumpResult::Success { new_index, .. } => assert_eq!(new_index, 1),
            JumpResult::Miss => panic!("correct direction must land"),
        }
    }

    #[test]
    fn test_landing_advances_and_locks_input() {
        let sequence = PlatformSequence::new("12345");
        let mut controller = JumpController::new(sequence.clone());

        let outcome = controller.jump(correct(&sequence, 0), 1_000);
        assert_eq!(outcome, JumpOutcome::Landed { platform_index: 1, score: 160 });
        assert!(controller.is_jumping(1_100));

        // Still in motion: any input is dropped.
        assert_eq!(controller.jump(correct(&sequence, 1), 1_100), JumpOutcome::Ignored);
        assert_eq!(controller.platform_index(), 1);

        // Motion over.
        assert_eq!(controller.state(1_250), JumpState::Idle);
        let outcome = controller.jump(correct(&sequence, 1), 1_250);
        assert_eq!(outcome, JumpOutcome::Landed { platform_index: 2, score: 320 });
    }

    #[test]
    fn test_miss_keeps_index_and_score() {
        let sequence = PlatformSequence::new(RIGHT_AT_FIVE);
        let mut controller = JumpController::new(sequence.clone());
        let mut now = 0;
        for index in 0..4 {
            controller.jump(correct(&sequence, index), now);
            now += JUMP_SUCCESS_DURATION_MS;
        }
        assert_eq!(controller.platform_index(), 4);
        let score = controller.score();

        let outcome = controller.jump(Direction::Left, now);
        assert_eq!(outcome, JumpOutcome::Missed { hint: None });
        assert_eq!(controller.platform_index(), 4);
        assert_eq!(controller.score(), score);
        assert_eq!(controller.misses(), 1);

        // A failed jump holds the character longer than a successful one.
        assert!(controller.is_jumping(now + JUMP_SUCCESS_DURATION_MS));
        assert!(!controller.is_jumping(now + JUMP_FAIL_DURATION_MS));
    }

    #[test]
    fn test_three_misses_raise_one_hint() {
        let sequence = PlatformSequence::new("12345");
        let mut controller = JumpController::new(sequence.clone());
        let bad = wrong(&sequence, 0);
        let mut now = 0;
        let mut hints = Vec::new();

        for _ in 0..3 {
            if let JumpOutcome::Missed { hint: Some(hint) } = controller.jump(bad, now) {
                hints.push(hint);
            }
            now += JUMP_FAIL_DURATION_MS;
        }

        assert_eq!(hints.len(), 1);
        assert_eq!(controller.misses(), 0);
        assert_eq!(hints[0].platform_index, 1);
        assert_eq!(hints[0].direction(), correct(&sequence, 0));
        assert_eq!(controller.hint(), Some(hints[0]));

        // Landing clears the hint.
        controller.jump(hints[0].direction(), now);
        assert_eq!(controller.hint(), None);
    }

    #[test]
    fn test_consecutive_landings_strictly_increase_score() {
        let sequence = PlatformSequence::new("monotonic");
        let mut controller = JumpController::new(sequence.clone());
        let mut last = controller.score();
        let mut now = 0;
        for index in 0..50 {
            controller.jump(correct(&sequence, index), now);
            assert!(controller.score() > last);
            last = controller.score();
            now += JUMP_SUCCESS_DURATION_MS;
        }
    }

    #[test]
    fn test_unknown_key_is_ignored() {
        let mut controller = JumpController::new(PlatformSequence::new("12345"));
        assert_eq!(controller.key_down(65, 0), JumpOutcome::Ignored);
        assert_eq!(controller.misses(), 0);
        assert!(!controller.is_jumping(0));
    }
}
