//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Serialize, Deserialize};

use crate::core::quat::Rotation;
use crate::core::vec3::Position;
use crate::game::map::MapData;
use crate::game::player::{Player, PlayerId};
use crate::game::verifier::{ClientStateResponse, ForceStateCorrection, StateVerification};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the world.
    PlayerJoin(JoinRequest),

    /// Local player moved.
    PositionUpdate(PositionUpdate),

    /// Leaving voluntarily.
    PlayerLeave(LeaveRequest),

    /// Answer to a `state_verification` challenge.
    ClientStateResponse(ClientStateResponse),
}

/// Join request. Both fields are optional spawn hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Requested spawn position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Requested initial orientation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
}

/// Movement report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// New position.
    pub position: Position,
    /// New orientation.
    pub rotation: Rotation,
}

/// Voluntary leave. `id` must be the sender's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    /// Player leaving.
    pub id: PlayerId,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A player joined. The first one a client receives is itself.
    PlayerJoined(Player),

    /// Everyone already connected, in join order, excluding the recipient.
    PlayersList(Vec<Player>),

    /// Another player moved.
    PlayerMoved(PlayerMoved),

    /// A player disconnected.
    PlayerLeft(PlayerId),

    /// Shared world layout.
    MapData(MapData),

    /// Report your local state.
    StateVerification(StateVerification),

    /// Overwrite your local state with this.
    ForceStateCorrection(ForceStateCorrection),

    /// Request rejected.
    Error(ServerError),
}

/// Relayed movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMoved {
    /// Who moved.
    pub id: PlayerId,
    /// New position.
    pub position: Position,
    /// New orientation.
    pub rotation: Rotation,
}

impl PlayerMoved {
    /// Movement payload for a player's current state.
    pub fn from_player(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            position: player.position,
            rotation: player.rotation,
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame was not a valid client message.
    InvalidMessage,
    /// Connection already joined.
    DuplicateConnection,
    /// State contained non-finite numbers.
    MalformedUpdate,
    /// Request requires a prior `player_join`.
    NotJoined,
    /// Connection limit reached.
    ServerFull,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an `error` message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ServerError { code, message: message.into() })
    }

    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PlayerJoined(_) => "player_joined",
            Self::PlayersList(_) => "players_list",
            Self::PlayerMoved(_) => "player_moved",
            Self::PlayerLeft(_) => "player_left",
            Self::MapData(_) => "map_data",
            Self::StateVerification(_) => "state_verification",
            Self::ForceStateCorrection(_) => "force_state_correction",
            Self::Error(_) => "error",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::color::Color;
    use crate::game::verifier::ExpectedState;
    use serde_json::json;

    #[test]
    fn test_join_with_and_without_hints() {
        let bare = ClientMessage::from_json(r#"{"event":"player_join","data":{}}"#).unwrap();
        assert_eq!(bare, ClientMessage::PlayerJoin(JoinRequest::default()));

        let hinted = ClientMessage::from_json(
            r#"{"event":"player_join","data":{"position":{"x":1,"y":0,"z":2}}}"#,
        )
        .unwrap();
        match hinted {
            ClientMessage::PlayerJoin(req) => {
                assert_eq!(req.position, Some(Position::new(1.0, 0.0, 2.0)));
                assert_eq!(req.rotation, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_position_update_shape() {
        let msg = ClientMessage::PositionUpdate(PositionUpdate {
            position: Position::new(10.0, 0.0, 10.0),
            rotation: Rotation::IDENTITY,
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "position_update",
                "data": {
                    "position": {"x": 10.0, "y": 0.0, "z": 10.0},
                    "rotation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
                }
            })
        );
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = ClientMessage::from_json(
            r#"{"event":"position_update","data":{"position":{"x":1,"y":0,"z":2}}}"#,
        );
        assert!(err.is_err());
        assert!(ClientMessage::from_json(r#"{"event":"teleport","data":{}}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_player_leave_and_left() {
        let leave = ClientMessage::from_json(r#"{"event":"player_leave","data":{"id":"abc"}}"#).unwrap();
        assert_eq!(leave, ClientMessage::PlayerLeave(LeaveRequest { id: PlayerId::new("abc") }));

        let left = ServerMessage::PlayerLeft(PlayerId::new("abc")).to_json().unwrap();
        assert_eq!(left, r#"{"event":"player_left","data":"abc"}"#);
    }

    #[test]
    fn test_players_list_is_sequence() {
        let players = vec![
            Player::new(PlayerId::new("a"), Position::ZERO, Color::new(0.0, 1.0, 1.0)),
            Player::new(PlayerId::new("b"), Position::ZERO, Color::new(1.0, 0.0, 1.0)),
        ];
        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::PlayersList(players).to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "players_list");
        assert_eq!(value["data"][1]["id"], "b");
        assert_eq!(value["data"][0]["color"]["g"], 1.0);
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let messages = vec![
            ServerMessage::PlayerJoined(Player::new(PlayerId::new("a"), Position::ZERO, Color::new(1.0, 1.0, 0.0))),
            ServerMessage::PlayerMoved(PlayerMoved {
                id: PlayerId::new("a"),
                position: Position::new(1.0, 2.0, 3.0),
                rotation: Rotation::from_yaw(0.5),
            }),
            ServerMessage::StateVerification(StateVerification {
                expected: ExpectedState {
                    id: PlayerId::new("a"),
                    position: Position::ZERO,
                    color: Color::new(1.0, 1.0, 0.0),
                },
                timestamp: 1_700_000_000_000,
            }),
            ServerMessage::ForceStateCorrection(ForceStateCorrection {
                position: Position::ZERO,
                color: Color::new(1.0, 1.0, 0.0),
            }),
            ServerMessage::error(ErrorCode::DuplicateConnection, "already joined"),
        ];

        for msg in messages {
            let json = msg.to_json().unwrap();
            assert!(json.contains(msg.event_name()));
            assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
        }
    }

    #[test]
    fn test_error_codes() {
        let json = ServerMessage::error(ErrorCode::InvalidMessage, "bad frame").to_json().unwrap();
        assert!(json.contains("invalid_message"));
        assert!(json.contains("bad frame"));
    }

    #[test]
    fn test_map_data_camel_case() {
        let msg = ServerMessage::MapData(MapData { world_size: 100.0, seed: 3, obstacles: vec![] });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"worldSize\":100.0"));
    }
}
