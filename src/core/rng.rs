//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, produces identical sequence on all platforms, so two
//! clients handed the same map seed rebuild the same obstacle layout.

use sha2::{Sha256, Digest};

use super::vec3::Position;

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use neon_sync::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(42);
/// let value = rng.next_u64();
/// assert_eq!(value, 16629283624882167704); // Always the same!
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a float in [0, 1).
    ///
    /// Takes the top 24 bits so every value is exactly representable.
    #[inline]
    pub fn next_unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Generate a float in [min, max).
    #[inline]
    pub fn next_range(&mut self, min: f32, max: f32) -> f32 {
        if min >= max {
            return min;
        }
        min + (max - min) * self.next_unit()
    }

    /// Generate a ground-level point uniformly inside a disc around the origin.
    ///
    /// Uses rejection sampling for uniform distribution.
    pub fn random_point_in_disc(&mut self, radius: f32) -> Position {
        if radius <= 0.0 {
            return Position::ZERO;
        }
        loop {
            let x = self.next_range(-radius, radius);
            let z = self.next_range(-radius, radius);
            if x * x + z * z <= radius * radius {
                return Position::new(x, 0.0, z);
            }
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a map seed from a shared seed phrase.
///
/// Numeric phrases are used verbatim so operators can pin a layout with
/// `SYNC_MAP_SEED=1234`; anything else is hashed.
pub fn derive_map_seed(phrase: &str) -> u64 {
    if let Ok(seed) = phrase.trim().parse::<u64>() {
        return seed;
    }

    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"NEON_DOMINANCE_MAP_V1");
    hasher.update(phrase.as_bytes());

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        // Same seed must produce same sequence
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_known_values() {
        // Map layouts depend on this sequence; it must never change.
        let mut rng = DeterministicRng::new(42);
        assert_eq!(rng.next_u64(), 16629283624882167704);
        assert_eq!(rng.next_u64(), 1420492921613871959);
        assert_eq!(rng.next_u64(), 9768315062676884790);
    }

    #[test]
    fn test_next_int() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_next_unit_bounds() {
        let mut rng = DeterministicRng::new(9999);

        for _ in 0..10_000 {
            let v = rng.next_unit();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_next_range() {
        let mut rng = DeterministicRng::new(5678);

        for _ in 0..1000 {
            let v = rng.next_range(-10.0, 10.0);
            assert!((-10.0..10.0).contains(&v));
        }

        // Degenerate range returns min
        assert_eq!(rng.next_range(5.0, 5.0), 5.0);
    }

    #[test]
    fn test_random_point_in_disc() {
        let mut rng = DeterministicRng::new(7777);

        for _ in 0..500 {
            let p = rng.random_point_in_disc(20.0);
            assert_eq!(p.y, 0.0);
            assert!(p.x * p.x + p.z * p.z <= 400.0);
        }

        assert_eq!(rng.random_point_in_disc(0.0), Position::ZERO);
    }

    #[test]
    fn test_derive_map_seed() {
        assert_eq!(derive_map_seed("1234"), 1234);
        assert_eq!(derive_map_seed(" 77 "), 77);

        let a = derive_map_seed("night city");
        let b = derive_map_seed("night city");
        let c = derive_map_seed("day city");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
