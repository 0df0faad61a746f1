//! Core deterministic primitives.
//!
//! Everything every peer must compute identically lives here: seed hashing
//! and the reseed-per-call random draw. Wall-clock access is abstracted so
//! that the state machines above stay testable.

pub mod clock;
pub mod hash;
pub mod rng;

// Re-export core types
pub use clock::{Clock, EpochMillis, ManualClock, SystemClock};
pub use hash::seed_fingerprint;
pub use rng::SeededRandom;
