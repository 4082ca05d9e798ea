//! World Map Generation
//!
//! Deterministic obstacle layout from a shared seed. Every client receives
//! the same `MapData` on join, and any process given the same seed and
//! config produces a byte-identical map.
//!
//! The area around the origin is kept clear so there is always somewhere to
//! spawn.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use crate::core::color::Color;
use crate::core::rng::DeterministicRng;
use crate::core::vec3::Position;

/// Radius around the origin with no obstacles.
pub const SPAWN_CLEARING_RADIUS: f32 = 12.0;

const MIN_OBSTACLE_SIDE: f32 = 2.0;
const MAX_OBSTACLE_SIDE: f32 = 8.0;
const MIN_OBSTACLE_HEIGHT: f32 = 3.0;
const MAX_OBSTACLE_HEIGHT: f32 = 24.0;

/// Attempts per obstacle before it is skipped.
const PLACEMENT_ATTEMPTS: u32 = 16;

/// Dim building tints so players stay the brightest thing on screen.
const OBSTACLE_TINTS: [Color; 4] = [
    Color::new(0.1, 0.1, 0.2),
    Color::new(0.15, 0.05, 0.2),
    Color::new(0.05, 0.15, 0.2),
    Color::new(0.2, 0.1, 0.15),
];

/// Hash output type (256 bits / 32 bytes)
pub type MapHash = [u8; 32];

/// Map generation parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct MapConfig {
    /// Shared seed
    pub seed: u64,
    /// Side length of the square world, centered on the origin
    pub world_size: f32,
    /// Obstacles to place
    pub obstacle_count: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            world_size: 200.0,
            obstacle_count: 40,
        }
    }
}

/// Box extents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSize {
    /// Extent along X
    pub width: f32,
    /// Extent along Y
    pub height: f32,
    /// Extent along Z
    pub depth: f32,
}

/// One axis-aligned box standing on the ground.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleData {
    /// Center of the footprint (y is half the height)
    pub position: Position,
    /// Extents
    pub size: ObstacleSize,
    /// Tint
    pub color: Color,
}

impl ObstacleData {
    /// True when `point` lies within the footprint grown by `margin`.
    pub fn blocks(&self, point: Position, margin: f32) -> bool {
        let half_w = self.size.width * 0.5 + margin;
        let half_d = self.size.depth * 0.5 + margin;
        (point.x - self.position.x).abs() <= half_w && (point.z - self.position.z).abs() <= half_d
    }

    /// Footprint circumradius.
    fn reach(&self) -> f32 {
        let hw = self.size.width * 0.5;
        let hd = self.size.depth * 0.5;
        (hw * hw + hd * hd).sqrt()
    }
}

/// Full map payload, sent once per join.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapData {
    /// Side length of the square world
    pub world_size: f32,
    /// Seed the layout was generated from
    pub seed: u64,
    /// Obstacles in generation order
    pub obstacles: Vec<ObstacleData>,
}

impl MapData {
    /// Generate the layout for `config`.
    pub fn generate(config: &MapConfig) -> Self {
        let mut rng = DeterministicRng::new(config.seed);
        let half = (config.world_size * 0.5).max(0.0);
        let mut obstacles: Vec<ObstacleData> = Vec::with_capacity(config.obstacle_count as usize);

        for _ in 0..config.obstacle_count {
            for _ in 0..PLACEMENT_ATTEMPTS {
                let width = rng.next_range(MIN_OBSTACLE_SIDE, MAX_OBSTACLE_SIDE);
                let depth = rng.next_range(MIN_OBSTACLE_SIDE, MAX_OBSTACLE_SIDE);
                let height = rng.next_range(MIN_OBSTACLE_HEIGHT, MAX_OBSTACLE_HEIGHT);
                let x = rng.next_range(-half + width * 0.5, half - width * 0.5);
                let z = rng.next_range(-half + depth * 0.5, half - depth * 0.5);
                let tint = OBSTACLE_TINTS[rng.next_int(OBSTACLE_TINTS.len() as u32) as usize];

                let candidate = ObstacleData {
                    position: Position::new(x, height * 0.5, z),
                    size: ObstacleSize { width, height, depth },
                    color: tint,
                };

                let clear_of_spawn = candidate.position.ground_distance(Position::ZERO)
                    > SPAWN_CLEARING_RADIUS + candidate.reach();
                let clear_of_others = obstacles
                    .iter()
                    .all(|o| !o.blocks(candidate.position, candidate.reach()));

                if clear_of_spawn && clear_of_others {
                    obstacles.push(candidate);
                    break;
                }
            }
        }

        Self {
            world_size: config.world_size,
            seed: config.seed,
            obstacles,
        }
    }

    /// True when `point` is inside (or within `margin` of) any obstacle.
    pub fn is_blocked(&self, point: Position, margin: f32) -> bool {
        self.obstacles.iter().any(|o| o.blocks(point, margin))
    }

    /// True when `point` is inside the world bounds.
    pub fn contains(&self, point: Position) -> bool {
        let half = self.world_size * 0.5;
        point.x.abs() <= half && point.z.abs() <= half
    }

    /// SHA-256 over the canonical bincode encoding.
    pub fn fingerprint(&self) -> Result<MapHash, bincode::Error> {
        let bytes = bincode::serialize(self)?;
        let mut hasher = Sha256::new();
        hasher.update(b"NEON_DOMINANCE_MAPDATA_V1");
        hasher.update(&bytes);

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Ok(hash)
    }

    /// Hex fingerprint for logs; empty if encoding fails.
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint().map(hex::encode).unwrap_or_default()
    }
}
