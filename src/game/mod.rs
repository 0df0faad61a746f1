//! Game Logic Module
//!
//! Everything a client computes locally during a session. 100% deterministic
//! given the session seed.
//!
//! ## Module Structure
//!
//! - `platform`: Platform column derived from the session seed
//! - `jump`: Jump validation and the per-character jump state
//! - `events`: Synchronous event bus for cross-component notification

pub mod platform;
pub mod jump;
pub mod events;

// Re-export key types
pub use platform::{platform_type, score_for_index, Platform, PlatformSequence, PlatformType};
pub use jump::{attempt_jump, Direction, Hint, JumpController, JumpOutcome, JumpResult, JumpState};
pub use events::{EventBus, ListenerId};
