//! Client Layer
//!
//! Client half of the sync protocol: local/remote player state and an async
//! WebSocket connector. Used by the bot binary and the integration tests.

pub mod state;
pub mod connection;

pub use state::{ClientSyncState, ClientPhase, ConnectionStatus};
pub use connection::{SyncClient, ClientEvent, ClientError};
