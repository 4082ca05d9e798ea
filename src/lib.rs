//! # Neon Dominance Sync
//!
//! Authoritative player-state synchronization for the Neon Dominance open world.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    NEON DOMINANCE SYNC                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Math primitives                           │
//! │  ├── color.rs    - RGB colors and the neon palette           │
//! │  ├── vec3.rs     - World positions                           │
//! │  ├── quat.rs     - Quaternions, YXZ Euler conversion         │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  game/           - Player state (no I/O)                     │
//! │  ├── player.rs   - Player id and state                       │
//! │  ├── color_pool.rs - Identity color allocation               │
//! │  ├── registry.rs - Connected players                         │
//! │  ├── verifier.rs - Drift detection and corrections           │
//! │  └── map.rs      - Seeded obstacle layout                    │
//! │                                                              │
//! │  network/        - Server (async)                            │
//! │  ├── protocol.rs - Wire events                               │
//! │  ├── coordinator.rs - Single owner of player state           │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  client/         - Client half of the protocol               │
//! │  ├── state.rs    - Local player, remote proxies              │
//! │  └── connection.rs - WebSocket connector                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! - The server is authoritative; last received update wins
//! - Live identity colors are pairwise distinct (`COLOR_MIN_DISTANCE`)
//! - Clients are periodically challenged and corrected on drift
//! - Maps are rebuilt identically from a shared seed

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod client;

// Re-export commonly used types
pub use crate::core::color::{Color, NEUTRAL_GRAY, COLOR_MIN_DISTANCE, COLOR_POOL_SIZE};
pub use crate::core::vec3::Position;
pub use crate::core::quat::{Rotation, EulerAngles};
pub use crate::core::rng::DeterministicRng;
pub use crate::game::player::{Player, PlayerId};
pub use crate::game::registry::ConnectionRegistry;
pub use crate::game::color_pool::ColorPool;
pub use crate::game::verifier::StateVerifier;
pub use crate::network::server::{SyncServer, ServerConfig};
pub use crate::client::{ClientSyncState, SyncClient};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
