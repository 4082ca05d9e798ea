//! Identity Colors
//!
//! RGB colors in [0, 1] and the fixed neon palette handed out to players.
//!
//! Two colors are *distinct* when at least one channel differs by
//! `COLOR_MIN_DISTANCE` or more (Chebyshev distance).

use std::fmt;
use serde::{Serialize, Deserialize};

/// Minimum per-channel separation between two live identity colors.
pub const COLOR_MIN_DISTANCE: f32 = 0.3;

/// Number of colors in the fixed palette.
pub const COLOR_POOL_SIZE: usize = 12;

/// Color shown for a player that is not connected. Never handed out.
pub const NEUTRAL_GRAY: Color = Color::new(0.5, 0.5, 0.5);

/// Neon palette, in allocation order.
///
/// Every pair is at least 0.35 apart and every entry is at least 0.5 away
/// from `NEUTRAL_GRAY`.
pub const PALETTE: [Color; COLOR_POOL_SIZE] = [
    Color::new(0.0, 1.0, 1.0),   // cyan
    Color::new(1.0, 0.0, 1.0),   // magenta
    Color::new(1.0, 1.0, 0.0),   // yellow
    Color::new(0.0, 1.0, 0.0),   // green
    Color::new(1.0, 0.25, 0.0),  // orange-red
    Color::new(0.25, 0.5, 1.0),  // electric blue
    Color::new(1.0, 1.0, 1.0),   // white
    Color::new(0.6, 0.0, 1.0),   // violet
    Color::new(1.0, 0.6, 0.0),   // amber
    Color::new(0.0, 0.6, 0.4),   // teal
    Color::new(1.0, 0.0, 0.4),   // hot pink
    Color::new(0.5, 1.0, 0.5),   // mint
];

/// An RGB color with channels in [0, 1].
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    /// Red channel
    pub r: f32,
    /// Green channel
    pub g: f32,
    /// Blue channel
    pub b: f32,
}

impl Color {
    /// Create a new color. Channels are not clamped.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Largest absolute per-channel difference.
    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        color_distance(self, other)
    }

    /// Clamp every channel into [0, 1].
    pub fn clamped(self) -> Self {
        Self::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        )
    }

    /// True when every channel is finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }

    /// Hex string (`#rrggbb`) for logs.
    pub fn to_hex(self) -> String {
        let c = self.clamped();
        format!(
            "#{:02x}{:02x}{:02x}",
            (c.r * 255.0).round() as u8,
            (c.g * 255.0).round() as u8,
            (c.b * 255.0).round() as u8,
        )
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Color({:.3}, {:.3}, {:.3})", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Chebyshev distance between two colors.
#[inline]
pub fn color_distance(a: Color, b: Color) -> f32 {
    (a.r - b.r).abs()
        .max((a.g - b.g).abs())
        .max((a.b - b.b).abs())
}

/// True when the colors differ by at least `COLOR_MIN_DISTANCE` in some channel.
#[inline]
pub fn colors_are_distinct(a: Color, b: Color) -> bool {
    color_distance(a, b) >= COLOR_MIN_DISTANCE
}
