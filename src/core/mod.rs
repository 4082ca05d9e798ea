//! Core math primitives.
//!
//! Plain float types shared by the server and the client half of the
//! protocol, plus the seeded PRNG used wherever results must be reproducible.

pub mod color;
pub mod vec3;
pub mod quat;
pub mod rng;

// Re-export core types
pub use color::{Color, NEUTRAL_GRAY, PALETTE, COLOR_MIN_DISTANCE, COLOR_POOL_SIZE, colors_are_distinct, color_distance};
pub use vec3::Position;
pub use quat::{Rotation, EulerAngles};
pub use rng::{DeterministicRng, derive_map_seed};
