//! Network Layer
//!
//! WebSocket server and the coordinator task that owns all player state.
//! Everything here is async; the rules live in `game/`.

pub mod protocol;
pub mod coordinator;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, JoinRequest, PositionUpdate, LeaveRequest,
    PlayerMoved, ServerError, ErrorCode,
};
pub use coordinator::{
    Coordinator, CoordinatorCommand, CoordinatorError, CoordinatorHandle,
    Joined, Outbound, Recipient, spawn_coordinator,
};
pub use server::{SyncServer, ServerConfig, SyncServerError};
