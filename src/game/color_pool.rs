//! Identity Color Pool
//!
//! Hands every connected player a color that is visually distinct from every
//! other live player's color.
//!
//! ## Allocation Order
//!
//! 1. First free palette entry, in palette order
//! 2. Random synthesis, bounded by `max_random_attempts`
//! 3. Degraded: the least-similar candidate seen, locked anyway
//!
//! Allocation never fails. A degraded result is logged and reported through
//! `AllocationSource::Degraded` so callers can tell.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::color::{Color, NEUTRAL_GRAY, PALETTE, COLOR_MIN_DISTANCE, color_distance};
use crate::core::rng::DeterministicRng;
use crate::game::player::PlayerId;

/// Pool tuning.
#[derive(Clone, Debug)]
pub struct ColorPoolConfig {
    /// Minimum Chebyshev distance between live colors
    pub min_distance: f32,
    /// Random candidates tried once the palette is used up
    pub max_random_attempts: u32,
}

impl Default for ColorPoolConfig {
    fn default() -> Self {
        Self {
            min_distance: COLOR_MIN_DISTANCE,
            max_random_attempts: 64,
        }
    }
}

/// Where an allocated color came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationSource {
    /// Fixed palette entry
    Palette,
    /// Randomly generated, still distinct
    Synthesized,
    /// Best effort; may be close to another live color
    Degraded,
}

/// Result of `ColorPool::allocate`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Allocation {
    /// The locked color
    pub color: Color,
    /// How it was chosen
    pub source: AllocationSource,
}

/// Tracks which identity colors are locked by which players.
#[derive(Clone, Debug)]
pub struct ColorPool {
    config: ColorPoolConfig,
    locked: BTreeMap<PlayerId, Allocation>,
    rng: DeterministicRng,
}

impl ColorPool {
    /// Create a pool with default tuning.
    pub fn new(seed: u64) -> Self {
        Self::with_config(ColorPoolConfig::default(), seed)
    }

    /// Create a pool with explicit tuning.
    pub fn with_config(config: ColorPoolConfig, seed: u64) -> Self {
        Self {
            config,
            locked: BTreeMap::new(),
            rng: DeterministicRng::new(seed),
        }
    }

    /// Lock a color for `id`.
    ///
    /// Calling again for an id that already holds a color returns the same
    /// allocation.
    pub fn allocate(&mut self, id: &PlayerId) -> Allocation {
        if let Some(held) = self.locked.get(id) {
            return *held;
        }

        let allocation = self.choose();
        match allocation.source {
            AllocationSource::Degraded => warn!(
                player = %id.short(),
                color = %allocation.color,
                locked = self.locked.len(),
                "Color pool exhausted, using least-similar color"
            ),
            _ => debug!(
                player = %id.short(),
                color = %allocation.color,
                source = ?allocation.source,
                "Color allocated"
            ),
        }

        self.locked.insert(id.clone(), allocation);
        allocation
    }

    /// Unlock the color held by `id`. No-op if it holds nothing.
    pub fn release(&mut self, id: &PlayerId) -> Option<Color> {
        let released = self.locked.remove(id).map(|a| a.color);
        if let Some(color) = released {
            debug!(player = %id.short(), color = %color, "Color released");
        }
        released
    }

    /// Color currently held by `id`.
    pub fn color_of(&self, id: &PlayerId) -> Option<Color> {
        self.locked.get(id).map(|a| a.color)
    }

    /// Number of locked colors.
    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }

    /// True if any live lock came from the degraded path.
    pub fn has_degraded(&self) -> bool {
        self.locked.values().any(|a| a.source == AllocationSource::Degraded)
    }

    /// True when `a` and `b` are far enough apart for this pool.
    pub fn colors_are_distinct(&self, a: Color, b: Color) -> bool {
        color_distance(a, b) >= self.config.min_distance
    }

    /// True when `color` may be handed out right now.
    pub fn is_available(&self, color: Color) -> bool {
        self.colors_are_distinct(color, NEUTRAL_GRAY)
            && self.locked.values().all(|a| self.colors_are_distinct(color, a.color))
    }

    /// Distance to the closest locked (or reserved) color.
    fn nearest_distance(&self, color: Color) -> f32 {
        self.locked
            .values()
            .map(|a| color_distance(color, a.color))
            .fold(color_distance(color, NEUTRAL_GRAY), f32::min)
    }

    fn choose(&mut self) -> Allocation {
        // Palette first, in order
        if let Some(color) = PALETTE.iter().copied().find(|c| self.is_available(*c)) {
            return Allocation { color, source: AllocationSource::Palette };
        }

        // Palette entries nobody holds still compete in the degraded pick
        let mut candidates: Vec<Color> = PALETTE
            .iter()
            .copied()
            .filter(|c| !self.locked.values().any(|a| a.color == *c))
            .collect();

        for _ in 0..self.config.max_random_attempts {
            let candidate = Color::new(
                self.rng.next_unit(),
                self.rng.next_unit(),
                self.rng.next_unit(),
            );
            if self.is_available(candidate) {
                return Allocation { color: candidate, source: AllocationSource::Synthesized };
            }
            candidates.push(candidate);
        }

        let best = candidates
            .into_iter()
            .map(|c| (self.nearest_distance(c), c))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, c)| c);

        let color = match best {
            Some(color) => color,
            None => Color::new(self.rng.next_unit(), self.rng.next_unit(), self.rng.next_unit()),
        };

        Allocation { color, source: AllocationSource::Degraded }
    }
}
