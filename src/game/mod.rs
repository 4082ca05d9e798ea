//! Game State Module
//!
//! Authoritative player state, free of any I/O.
//!
//! ## Module Structure
//!
//! - `player`: Player identity and state
//! - `color_pool`: Identity color allocation
//! - `registry`: Connected players, owns the color pool
//! - `verifier`: Drift detection and corrections
//! - `map`: Deterministic obstacle layout

pub mod player;
pub mod color_pool;
pub mod registry;
pub mod verifier;
pub mod map;

// Re-export key types
pub use player::{Player, PlayerId};
pub use color_pool::{Allocation, AllocationSource, ColorPool, ColorPoolConfig};
pub use registry::{ConnectionRegistry, RegistryConfig, RegistryError};
pub use verifier::{
    StateVerifier, VerifierConfig, VerificationOutcome, DriftReport,
    StateVerification, ExpectedState, ClientStateResponse, ForceStateCorrection,
};
pub use map::{MapConfig, MapData, ObstacleData, ObstacleSize};
