//! Player Identity and State
//!
//! A player is a moving entity with a position, an orientation and an
//! identity color. The server owns one `Player` per connection; clients hold
//! one local player plus read-only copies of everyone else.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::color::{Color, NEUTRAL_GRAY};
use crate::core::quat::Rotation;
use crate::core::vec3::Position;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Connection-scoped player identifier (UUID v4 string on the wire).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Fresh random id for a new connection.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id parses as a UUID.
    pub fn is_uuid(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Authoritative state of one player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Connection-scoped id
    pub id: PlayerId,

    /// World position
    pub position: Position,

    /// Orientation
    pub rotation: Rotation,

    /// Identity color
    pub color: Color,
}

impl Player {
    /// Create a player with the given color at a position, facing forward.
    pub fn new(id: PlayerId, position: Position, color: Color) -> Self {
        Self {
            id,
            position,
            rotation: Rotation::IDENTITY,
            color,
        }
    }

    /// Placeholder shown before the server has assigned an identity.
    pub fn unassigned() -> Self {
        Self::new(PlayerId::default(), Position::ZERO, NEUTRAL_GRAY)
    }

    /// Overwrite position and orientation (last write wins).
    pub fn set_transform(&mut self, position: Position, rotation: Rotation) {
        self.position = position;
        self.rotation = rotation;
    }

    /// True when no component of the state is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.color.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_uuids() {
        let a = PlayerId::generate();
        let b = PlayerId::generate();
        assert_ne!(a, b);
        assert!(a.is_uuid());
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_short_id_on_short_string() {
        assert_eq!(PlayerId::new("abc").short(), "abc");
    }

    #[test]
    fn test_id_serializes_as_bare_string() {
        let id = PlayerId::new("p-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p-1\"");
    }

    #[test]
    fn test_player_defaults() {
        let p = Player::new(PlayerId::new("a"), Position::new(1.0, 0.0, 2.0), Color::new(0.0, 1.0, 1.0));
        assert_eq!(p.rotation, Rotation::IDENTITY);
        assert!(p.is_finite());

        let u = Player::unassigned();
        assert_eq!(u.color, NEUTRAL_GRAY);
    }

    #[test]
    fn test_set_transform_last_write_wins() {
        let mut p = Player::unassigned();
        p.set_transform(Position::new(1.0, 0.0, 1.0), Rotation::from_yaw(0.3));
        p.set_transform(Position::new(10.0, 0.0, 10.0), Rotation::IDENTITY);
        assert_eq!(p.position, Position::new(10.0, 0.0, 10.0));
        assert_eq!(p.rotation, Rotation::IDENTITY);
    }
}
