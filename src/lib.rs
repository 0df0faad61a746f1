//! # Jumpy
//!
//! Matchmaking coordinator and peer-to-peer session logic for Jumpy, a
//! multiplayer platform-climbing race.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        JUMPY                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── hash.rs     - Domain-separated SHA-256 seed hashing     │
//! │  ├── rng.rs      - Reseed-per-call seeded random             │
//! │  └── clock.rs    - Wall clock abstraction                    │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── platform.rs - Platform lane generation and scoring      │
//! │  ├── jump.rs     - Jump resolution, lock, and hints          │
//! │  └── events.rs   - Synchronous event bus                     │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── admin.rs    - Matchmaking coordinator                   │
//! │  ├── client.rs   - Client session controller                 │
//! │  ├── broker.rs   - Point-to-point link routing               │
//! │  ├── local.rs    - In-memory network                         │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! Every peer in a session derives the same platform column from the
//! session seed alone:
//! - No floating-point arithmetic in lane selection
//! - No shared generator state between draws
//! - No dependency on draw order or wall time
//!
//! Given the same seed and index, [`platform_type`] returns the same lane
//! on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::config::{AdminConfig, ConfigError, ServerConfig};
pub use crate::core::clock::{Clock, EpochMillis, ManualClock, SystemClock};
pub use crate::core::rng::SeededRandom;
pub use crate::game::{platform_type, Direction, JumpController, PlatformSequence, PlatformType};
pub use crate::network::{
    ClientSessionController, GameServer, LocalNetwork, MatchmakingCoordinator, Message, PeerId,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version
pub const PROTOCOL_VERSION: u32 = 1;
