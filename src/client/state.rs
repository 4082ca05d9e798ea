//! Client Sync State
//!
//! The client half of the protocol: one owned local player, read-only
//! proxies for everyone else, and the connection state machine.
//!
//! ```text
//! Disconnected → Connecting → Joined → Active ⇄ AwaitingVerification
//!       ▲                                  │
//!       └──────────────────────────────────┘
//! ```
//!
//! The server is authoritative: corrections overwrite local state without
//! question, so applying one twice is the same as applying it once.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::color::NEUTRAL_GRAY;
use crate::core::quat::{EulerAngles, Rotation};
use crate::core::vec3::Position;
use crate::game::map::MapData;
use crate::game::player::{Player, PlayerId};
use crate::game::verifier::{ClientStateResponse, ForceStateCorrection};
use crate::network::protocol::{
    ClientMessage, JoinRequest, LeaveRequest, PlayerMoved, PositionUpdate, ServerMessage,
};

/// Transport status as reported to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Socket open
    Connected,
    /// Socket closed
    Disconnected,
    /// Socket failed
    Error,
}

/// Client protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// No connection
    Disconnected,
    /// `player_join` sent, waiting for our own `player_joined`
    Connecting,
    /// Identity assigned, waiting for roster and map
    Joined,
    /// Normal play
    Active,
    /// Answered a challenge, waiting to see if a correction follows
    AwaitingVerification,
}

/// Everything a client knows about the shared world.
#[derive(Debug, Clone)]
pub struct ClientSyncState {
    phase: ClientPhase,
    local: Player,
    remotes: BTreeMap<PlayerId, Player>,
    map: Option<MapData>,
    corrections: u32,
}

impl Default for ClientSyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSyncState {
    /// Disconnected state with a gray placeholder player.
    pub fn new() -> Self {
        Self {
            phase: ClientPhase::Disconnected,
            local: Player::unassigned(),
            remotes: BTreeMap::new(),
            map: None,
            corrections: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// The local player.
    pub fn local(&self) -> &Player {
        &self.local
    }

    /// Remote proxy for `id`.
    pub fn remote(&self, id: &PlayerId) -> Option<&Player> {
        self.remotes.get(id)
    }

    /// All remote proxies, ordered by id.
    pub fn remotes(&self) -> impl Iterator<Item = &Player> {
        self.remotes.values()
    }

    /// Number of remote proxies.
    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Map received on join.
    pub fn map(&self) -> Option<&MapData> {
        self.map.as_ref()
    }

    /// Corrections applied since joining.
    pub fn corrections(&self) -> u32 {
        self.corrections
    }

    /// True once the server has assigned an identity.
    pub fn is_joined(&self) -> bool {
        matches!(
            self.phase,
            ClientPhase::Joined | ClientPhase::Active | ClientPhase::AwaitingVerification
        )
    }

    /// React to a transport status change.
    ///
    /// `Connected` moves to `Connecting` and returns the `player_join` to send.
    pub fn on_status(&mut self, status: ConnectionStatus, hint: JoinRequest) -> Option<ClientMessage> {
        match status {
            ConnectionStatus::Connected if self.phase == ClientPhase::Disconnected => {
                self.phase = ClientPhase::Connecting;
                Some(ClientMessage::PlayerJoin(hint))
            }
            ConnectionStatus::Connected => None,
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                self.reset();
                None
            }
        }
    }

    /// Apply one server message. Returns any reply to send.
    pub fn handle(&mut self, message: ServerMessage) -> Option<ClientMessage> {
        if self.phase == ClientPhase::AwaitingVerification
            && !matches!(message, ServerMessage::StateVerification(_))
        {
            self.phase = ClientPhase::Active;
        }

        match message {
            ServerMessage::PlayerJoined(player) => {
                if self.phase == ClientPhase::Connecting {
                    info!(id = %player.id.short(), color = %player.color, "Joined");
                    self.local = player;
                    self.phase = ClientPhase::Joined;
                } else if player.id != self.local.id {
                    self.remotes.insert(player.id.clone(), player);
                }
                None
            }
            ServerMessage::PlayersList(players) => {
                for player in players.into_iter().filter(|p| p.id != self.local.id) {
                    self.remotes.insert(player.id.clone(), player);
                }
                self.promote();
                None
            }
            ServerMessage::MapData(map) => {
                self.map = Some(map);
                self.promote();
                None
            }
            ServerMessage::PlayerMoved(moved) => {
                self.apply_moved(moved);
                None
            }
            ServerMessage::PlayerLeft(id) => {
                self.remotes.remove(&id);
                None
            }
            ServerMessage::StateVerification(request) => {
                if !self.is_joined() {
                    return None;
                }
                self.phase = ClientPhase::AwaitingVerification;
                Some(ClientMessage::ClientStateResponse(ClientStateResponse {
                    position: self.local.position,
                    color: self.local.color,
                    timestamp: request.timestamp,
                }))
            }
            ServerMessage::ForceStateCorrection(correction) => {
                self.apply_correction(&correction);
                None
            }
            ServerMessage::Error(e) => {
                warn!(code = ?e.code, "Server error: {}", e.message);
                None
            }
        }
    }

    /// Overwrite local color and position with the server's.
    pub fn apply_correction(&mut self, correction: &ForceStateCorrection) {
        debug!(
            from = ?self.local.position,
            to = ?correction.position,
            "Applying state correction"
        );
        self.local.position = correction.position;
        self.local.color = correction.color;
        self.corrections += 1;
        if self.is_joined() {
            self.phase = ClientPhase::Active;
        }
    }

    /// Move the local player. Returns the update to send once joined.
    pub fn move_local(&mut self, position: Position, rotation: Rotation) -> Option<ClientMessage> {
        self.local.set_transform(position, rotation);
        if !self.is_joined() {
            return None;
        }
        if self.phase == ClientPhase::AwaitingVerification {
            self.phase = ClientPhase::Active;
        }
        Some(ClientMessage::PositionUpdate(PositionUpdate { position, rotation }))
    }

    /// Move with mouse-look angles; converted to a quaternion first.
    pub fn move_local_euler(&mut self, position: Position, angles: EulerAngles) -> Option<ClientMessage> {
        self.move_local(position, angles.to_rotation())
    }

    /// Leave voluntarily. Returns the `player_leave` to send.
    pub fn leave(&mut self) -> Option<ClientMessage> {
        if !self.is_joined() {
            return None;
        }
        let message = ClientMessage::PlayerLeave(LeaveRequest { id: self.local.id.clone() });
        self.reset();
        Some(message)
    }

    /// Local player followed by every remote proxy.
    pub fn roster(&self) -> Vec<&Player> {
        std::iter::once(&self.local).chain(self.remotes.values()).collect()
    }

    fn promote(&mut self) {
        if self.phase == ClientPhase::Joined {
            self.phase = ClientPhase::Active;
        }
    }

    fn apply_moved(&mut self, moved: PlayerMoved) {
        match self.remotes.get_mut(&moved.id) {
            Some(proxy) => proxy.set_transform(moved.position, moved.rotation),
            None => debug!(id = %moved.id.short(), "Move for unknown player"),
        }
    }

    fn reset(&mut self) {
        self.phase = ClientPhase::Disconnected;
        self.local.color = NEUTRAL_GRAY;
        self.remotes.clear();
    }
}
