//! Connection Registry
//!
//! The set of connected players and their latest known state. The registry
//! owns the `ColorPool`, so removing an entry and releasing its color are a
//! single operation and can never drift apart.

use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::quat::Rotation;
use crate::core::rng::DeterministicRng;
use crate::core::vec3::Position;
use crate::game::color_pool::{AllocationSource, ColorPool, ColorPoolConfig};
use crate::game::map::{MapData, SPAWN_CLEARING_RADIUS};
use crate::game::player::{Player, PlayerId};

/// Golden angle, spreads fallback spawns around the ring.
const GOLDEN_ANGLE: f32 = 2.399_963;

/// Registry errors.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// Join with an id that is already registered
    #[error("player {0} is already connected")]
    DuplicateConnection(PlayerId),

    /// Update or lookup for an id that is not registered
    #[error("player {0} is not connected")]
    UnknownPlayer(PlayerId),

    /// Non-finite component in a submitted state
    #[error("malformed state from {id}: {reason}")]
    MalformedUpdate {
        /// Sender
        id: PlayerId,
        /// What was wrong
        reason: &'static str,
    },
}

/// Registry tuning.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Random spawns land inside this radius around the origin
    pub spawn_radius: f32,
    /// Random spawn attempts before the fallback ring
    pub spawn_attempts: u32,
    /// Clearance kept between a spawn point and any obstacle
    pub spawn_margin: f32,
    /// Color pool tuning
    pub pool: ColorPoolConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            spawn_radius: 20.0,
            spawn_attempts: 32,
            spawn_margin: 1.5,
            pool: ColorPoolConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    seq: u64,
    player: Player,
    source: AllocationSource,
}

/// Connected players keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    config: RegistryConfig,
    entries: BTreeMap<PlayerId, Entry>,
    pool: ColorPool,
    map: Arc<MapData>,
    rng: DeterministicRng,
    next_seq: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry over `map`. `seed` drives colors and spawns.
    pub fn new(config: RegistryConfig, map: Arc<MapData>, seed: u64) -> Self {
        let pool = ColorPool::with_config(config.pool.clone(), seed);
        Self {
            config,
            entries: BTreeMap::new(),
            pool,
            map,
            rng: DeterministicRng::new(seed ^ 0x5350_4157_4E5F_5631),
            next_seq: 0,
        }
    }

    /// Register a new player.
    ///
    /// Allocates a color, then places the player at `position` if given or
    /// at a random clear spot otherwise. Nothing changes on error.
    pub fn join(
        &mut self,
        id: PlayerId,
        position: Option<Position>,
        rotation: Option<Rotation>,
    ) -> Result<Player, RegistryError> {
        if self.entries.contains_key(&id) {
            warn!(player = %id.short(), "Duplicate join rejected");
            return Err(RegistryError::DuplicateConnection(id));
        }
        if position.is_some_and(|p| !p.is_finite()) {
            return Err(RegistryError::MalformedUpdate { id, reason: "non-finite spawn position" });
        }
        if rotation.is_some_and(|r| !r.is_finite()) {
            return Err(RegistryError::MalformedUpdate { id, reason: "non-finite spawn rotation" });
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let allocation = self.pool.allocate(&id);
        let position = match position {
            Some(p) => p,
            None => self.spawn_point(seq),
        };

        let mut player = Player::new(id.clone(), position, allocation.color);
        if let Some(r) = rotation {
            player.rotation = r;
        }

        info!(
            player = %id.short(),
            color = %allocation.color,
            source = ?allocation.source,
            x = position.x,
            z = position.z,
            connected = self.entries.len() + 1,
            "Player joined"
        );

        self.entries.insert(id, Entry { seq, player: player.clone(), source: allocation.source });
        Ok(player)
    }

    /// Overwrite a player's position and rotation. Last received wins.
    pub fn apply_position_update(
        &mut self,
        id: &PlayerId,
        position: Position,
        rotation: Rotation,
    ) -> Result<&Player, RegistryError> {
        if !position.is_finite() {
            return Err(RegistryError::MalformedUpdate { id: id.clone(), reason: "non-finite position" });
        }
        if !rotation.is_finite() {
            return Err(RegistryError::MalformedUpdate { id: id.clone(), reason: "non-finite rotation" });
        }

        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownPlayer(id.clone()))?;
        entry.player.set_transform(position, rotation);
        Ok(&entry.player)
    }

    /// Remove a player and release its color. No-op if absent.
    pub fn leave(&mut self, id: &PlayerId) -> Option<Player> {
        let entry = self.entries.remove(id)?;
        self.pool.release(id);
        info!(player = %id.short(), connected = self.entries.len(), "Player left");
        Some(entry.player)
    }

    /// Look up a player.
    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.entries.get(id).map(|e| &e.player)
    }

    /// True if `id` is registered.
    pub fn contains(&self, id: &PlayerId) -> bool {
        self.entries.contains_key(id)
    }

    /// How the player's color was chosen.
    pub fn allocation_source(&self, id: &PlayerId) -> Option<AllocationSource> {
        self.entries.get(id).map(|e| e.source)
    }

    /// Connected player count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All players in join order.
    pub fn snapshot(&self) -> Vec<Player> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.player.clone()).collect()
    }

    /// All players except `id`, in join order.
    pub fn snapshot_excluding(&self, id: &PlayerId) -> Vec<Player> {
        self.snapshot().into_iter().filter(|p| &p.id != id).collect()
    }

    /// The color pool (read-only).
    pub fn pool(&self) -> &ColorPool {
        &self.pool
    }

    /// The map spawns are placed on.
    pub fn map(&self) -> &Arc<MapData> {
        &self.map
    }

    fn spawn_point(&mut self, seq: u64) -> Position {
        for _ in 0..self.config.spawn_attempts {
            let p = self.rng.random_point_in_disc(self.config.spawn_radius);
            if self.map.contains(p) && !self.map.is_blocked(p, self.config.spawn_margin) {
                return p;
            }
        }

        // Ring inside the clearing the map generator guarantees
        let radius = SPAWN_CLEARING_RADIUS * 0.5;
        let angle = (seq as f32 * GOLDEN_ANGLE) % TAU;
        debug!(seq, "Random spawn failed, using fallback ring");
        Position::new(radius * angle.cos(), 0.0, radius * angle.sin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::color::{colors_are_distinct, Color, COLOR_POOL_SIZE, PALETTE};
    use crate::game::map::{MapConfig, ObstacleData, ObstacleSize};

    fn registry() -> ConnectionRegistry {
        let map = MapData::generate(&MapConfig { seed: 42, ..MapConfig::default() });
        ConnectionRegistry::new(RegistryConfig::default(), Arc::new(map), 42)
    }

    fn id(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    #[test]
    fn test_join_assigns_color_and_identity_rotation() {
        let mut reg = registry();
        let p = reg.join(id("a"), Some(Position::new(1.0, 0.0, 2.0)), None).unwrap();

        assert_eq!(p.color, PALETTE[0]);
        assert_eq!(p.rotation, Rotation::IDENTITY);
        assert_eq!(p.position, Position::new(1.0, 0.0, 2.0));
        assert_eq!(reg.get(&id("a")), Some(&p));
        assert_eq!(reg.allocation_source(&id("a")), Some(AllocationSource::Palette));
    }

    #[test]
    fn test_join_uses_supplied_rotation() {
        let mut reg = registry();
        let r = Rotation::from_yaw(1.0);
        let p = reg.join(id("a"), None, Some(r)).unwrap();
        assert_eq!(p.rotation, r);
    }

    #[test]
    fn test_duplicate_join_rejected_without_mutation() {
        let mut reg = registry();
        let first = reg.join(id("a"), Some(Position::ZERO), None).unwrap();

        let err = reg.join(id("a"), Some(Position::new(9.0, 0.0, 9.0)), None).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateConnection(id("a")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&id("a")), Some(&first));
        assert_eq!(reg.pool().locked_count(), 1);
    }

    #[test]
    fn test_join_rejects_non_finite_spawn() {
        let mut reg = registry();
        let err = reg.join(id("a"), Some(Position::new(f32::NAN, 0.0, 0.0)), None).unwrap_err();
        assert!(matches!(err, RegistryError::MalformedUpdate { .. }));
        assert!(reg.is_empty());
        assert_eq!(reg.pool().locked_count(), 0);
    }

    #[test]
    fn test_random_spawn_is_clear() {
        let mut reg = registry();
        for n in 0..30 {
            let p = reg.join(id(&format!("p{n}")), None, None).unwrap();
            assert!(p.position.ground_distance(Position::ZERO) <= 20.0 + 1e-3);
            assert!(!reg.map().is_blocked(p.position, 0.0));
        }
    }

    #[test]
    fn test_fallback_spawn_when_everything_is_blocked() {
        let wall = ObstacleData {
            position: Position::new(0.0, 5.0, 0.0),
            size: ObstacleSize { width: 100.0, height: 10.0, depth: 100.0 },
            color: Color::new(0.1, 0.1, 0.1),
        };
        let map = MapData { world_size: 200.0, seed: 0, obstacles: vec![wall] };
        let config = RegistryConfig { spawn_attempts: 4, ..RegistryConfig::default() };
        let mut reg = ConnectionRegistry::new(config, Arc::new(map), 1);

        let p = reg.join(id("a"), None, None).unwrap();
        let ring = SPAWN_CLEARING_RADIUS * 0.5;
        assert!((p.position.ground_distance(Position::ZERO) - ring).abs() < 1e-3);
    }

    #[test]
    fn test_position_update_last_write_wins() {
        let mut reg = registry();
        reg.join(id("a"), Some(Position::ZERO), None).unwrap();

        reg.apply_position_update(&id("a"), Position::new(1.0, 0.0, 1.0), Rotation::IDENTITY).unwrap();
        let p = reg
            .apply_position_update(&id("a"), Position::new(10.0, 0.0, 10.0), Rotation::from_yaw(0.5))
            .unwrap();
        assert_eq!(p.position, Position::new(10.0, 0.0, 10.0));
    }

    #[test]
    fn test_malformed_update_leaves_state() {
        let mut reg = registry();
        reg.join(id("a"), Some(Position::new(3.0, 0.0, 3.0)), None).unwrap();

        let err = reg
            .apply_position_update(&id("a"), Position::new(f32::INFINITY, 0.0, 0.0), Rotation::IDENTITY)
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedUpdate { .. }));

        let err = reg
            .apply_position_update(&id("a"), Position::ZERO, Rotation::new(f32::NAN, 0.0, 0.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedUpdate { .. }));

        assert_eq!(reg.get(&id("a")).unwrap().position, Position::new(3.0, 0.0, 3.0));
    }

    #[test]
    fn test_update_unknown_player() {
        let mut reg = registry();
        let err = reg
            .apply_position_update(&id("ghost"), Position::ZERO, Rotation::IDENTITY)
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownPlayer(id("ghost")));
    }

    #[test]
    fn test_leave_releases_color_and_is_idempotent() {
        let mut reg = registry();
        let a = reg.join(id("a"), None, None).unwrap();
        reg.join(id("b"), None, None).unwrap();

        assert_eq!(reg.leave(&id("a")).map(|p| p.color), Some(a.color));
        assert!(reg.leave(&id("a")).is_none());
        assert!(!reg.contains(&id("a")));
        assert_eq!(reg.pool().color_of(&id("a")), None);
        assert_eq!(reg.pool().locked_count(), reg.len());

        // Released color is handed to the next joiner
        let c = reg.join(id("c"), None, None).unwrap();
        assert_eq!(c.color, a.color);
    }

    #[test]
    fn test_snapshot_join_order() {
        let mut reg = registry();
        for name in ["zed", "amy", "mid"] {
            reg.join(id(name), None, None).unwrap();
        }
        let ids: Vec<String> = reg.snapshot().into_iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec!["zed", "amy", "mid"]);

        let others: Vec<String> = reg.snapshot_excluding(&id("amy")).into_iter().map(|p| p.id.0).collect();
        assert_eq!(others, vec!["zed", "mid"]);
    }

    #[test]
    fn test_full_palette_stays_distinct() {
        let mut reg = registry();
        for n in 0..COLOR_POOL_SIZE {
            reg.join(id(&format!("p{n}")), None, None).unwrap();
        }
        let snap = reg.snapshot();
        for (i, a) in snap.iter().enumerate() {
            for b in snap.iter().skip(i + 1) {
                assert!(colors_are_distinct(a.color, b.color));
            }
        }
    }
}
