//! Coordinator
//!
//! Single owner of the registry, the verifier and every peer's outbound
//! channel. Connection tasks talk to it through `CoordinatorHandle`; nothing
//! else touches player state, so no locks are needed.
//!
//! `Coordinator` is the synchronous core: each request returns the messages
//! it produced as `Outbound` values. `run_coordinator` wraps it in a task
//! that drains commands and delivers those messages.
//!
//! Delivery never waits on a peer. A full queue sheds `player_moved` and
//! `state_verification`, since the next one supersedes them. Any other
//! message that does not fit evicts the peer: it is removed as if it had
//! left and its connection is told to close, so no client is left holding
//! a roster it can never repair.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::game::map::MapData;
use crate::game::player::{Player, PlayerId};
use crate::game::registry::{ConnectionRegistry, RegistryConfig, RegistryError};
use crate::game::verifier::{ClientStateResponse, StateVerifier, VerificationOutcome, VerifierConfig};
use crate::network::protocol::{ErrorCode, JoinRequest, PlayerMoved, PositionUpdate, ServerMessage};

/// Command queue depth.
const COMMAND_BUFFER: usize = 256;

/// Coordinator errors seen by connection tasks.
#[derive(Debug, Error, PartialEq)]
pub enum CoordinatorError {
    /// Coordinator task has stopped
    #[error("coordinator has shut down")]
    Closed,

    /// Registry rejected the request
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Who a message is for.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipient {
    /// One player
    Player(PlayerId),
    /// Every connected player except one
    AllExcept(PlayerId),
}

/// A message produced by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Target
    pub to: Recipient,
    /// Payload
    pub message: ServerMessage,
}

impl Outbound {
    fn to_player(id: &PlayerId, message: ServerMessage) -> Self {
        Self { to: Recipient::Player(id.clone()), message }
    }

    fn to_others(id: &PlayerId, message: ServerMessage) -> Self {
        Self { to: Recipient::AllExcept(id.clone()), message }
    }
}

// =============================================================================
// SYNCHRONOUS CORE
// =============================================================================

/// Authoritative player state and the protocol rules around it.
#[derive(Debug)]
pub struct Coordinator {
    registry: ConnectionRegistry,
    verifier: StateVerifier,
    map: Arc<MapData>,
}

impl Coordinator {
    /// Create a coordinator for `map`.
    pub fn new(
        registry_config: RegistryConfig,
        verifier_config: VerifierConfig,
        map: Arc<MapData>,
        seed: u64,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(registry_config, map.clone(), seed),
            verifier: StateVerifier::new(verifier_config),
            map,
        }
    }

    /// Registry (read-only).
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Verifier (read-only).
    pub fn verifier(&self) -> &StateVerifier {
        &self.verifier
    }

    /// Register a player.
    ///
    /// The joiner gets, in order: its own `player_joined`, `players_list` of
    /// everyone else, `map_data`. Everyone else gets `player_joined`.
    pub fn join(
        &mut self,
        id: PlayerId,
        request: JoinRequest,
    ) -> Result<(Player, Vec<Outbound>), RegistryError> {
        let player = self.registry.join(id, request.position, request.rotation)?;
        let id = &player.id;

        let out = vec![
            Outbound::to_player(id, ServerMessage::PlayerJoined(player.clone())),
            Outbound::to_player(id, ServerMessage::PlayersList(self.registry.snapshot_excluding(id))),
            Outbound::to_player(id, ServerMessage::MapData((*self.map).clone())),
            Outbound::to_others(id, ServerMessage::PlayerJoined(player.clone())),
        ];
        Ok((player, out))
    }

    /// Apply a movement report and relay it to everyone else.
    ///
    /// Rejected updates produce an `error` for the sender and no broadcast.
    pub fn position_update(&mut self, id: &PlayerId, update: PositionUpdate) -> Vec<Outbound> {
        match self.registry.apply_position_update(id, update.position, update.rotation) {
            Ok(player) => vec![Outbound::to_others(
                id,
                ServerMessage::PlayerMoved(PlayerMoved::from_player(player)),
            )],
            Err(e @ RegistryError::MalformedUpdate { .. }) => {
                debug!(player = %id.short(), error = %e, "Dropped malformed update");
                vec![Outbound::to_player(id, ServerMessage::error(ErrorCode::MalformedUpdate, e.to_string()))]
            }
            Err(e) => {
                debug!(player = %id.short(), error = %e, "Dropped update");
                vec![Outbound::to_player(id, ServerMessage::error(ErrorCode::NotJoined, e.to_string()))]
            }
        }
    }

    /// Remove a player. Idempotent: a second call produces nothing.
    pub fn leave(&mut self, id: &PlayerId) -> Vec<Outbound> {
        self.verifier.forget(id);
        match self.registry.leave(id) {
            Some(_) => vec![Outbound::to_others(id, ServerMessage::PlayerLeft(id.clone()))],
            None => Vec::new(),
        }
    }

    /// Issue a verification challenge.
    pub fn challenge(&mut self, id: &PlayerId, now: Instant, timestamp: i64) -> Vec<Outbound> {
        let Some(player) = self.registry.get(id) else {
            return Vec::new();
        };
        let request = self.verifier.challenge(player, now, timestamp);
        vec![Outbound::to_player(id, ServerMessage::StateVerification(request))]
    }

    /// Process a challenge answer.
    pub fn state_response(
        &mut self,
        id: &PlayerId,
        response: &ClientStateResponse,
        now: Instant,
    ) -> (VerificationOutcome, Vec<Outbound>) {
        let Some(player) = self.registry.get(id) else {
            return (VerificationOutcome::Unsolicited, Vec::new());
        };

        let outcome = self.verifier.on_client_response(id, response, player, now);
        let out = match &outcome {
            VerificationOutcome::Corrected { correction, .. } => vec![Outbound::to_player(
                id,
                ServerMessage::ForceStateCorrection(correction.clone()),
            )],
            _ => Vec::new(),
        };
        (outcome, out)
    }

    /// Drop timed-out challenges.
    pub fn sweep(&mut self, now: Instant) -> Vec<PlayerId> {
        self.verifier.expire(now)
    }
}

// =============================================================================
// TASK
// =============================================================================

/// Requests handled by the coordinator task.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Join with the connection's outbound channel
    Join {
        /// Connection-assigned id
        id: PlayerId,
        /// Spawn hints
        request: JoinRequest,
        /// Where this player's messages go
        outbound: mpsc::Sender<ServerMessage>,
        /// Result
        reply: oneshot::Sender<Result<Joined, RegistryError>>,
    },
    /// Movement report
    PositionUpdate {
        /// Sender
        id: PlayerId,
        /// New state
        update: PositionUpdate,
    },
    /// Disconnect or voluntary leave
    Leave {
        /// Player leaving
        id: PlayerId,
    },
    /// Verification timer fired for this connection
    Verify {
        /// Player to challenge
        id: PlayerId,
    },
    /// Answer to a challenge
    StateResponse {
        /// Sender
        id: PlayerId,
        /// Reported state
        response: ClientStateResponse,
    },
    /// Current roster in join order
    Snapshot {
        /// Result
        reply: oneshot::Sender<Vec<Player>>,
    },
}

/// A successful join.
#[derive(Debug)]
pub struct Joined {
    /// Assigned state
    pub player: Player,
    /// Resolves with `Ok` if the coordinator evicts this player, or with an
    /// error once it stops tracking the player for any other reason.
    pub evicted: oneshot::Receiver<()>,
}

/// Cloneable handle used by connection tasks.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    async fn send(&self, command: CoordinatorCommand) -> Result<(), CoordinatorError> {
        self.tx.send(command).await.map_err(|_| CoordinatorError::Closed)
    }

    /// Join and wait for the assigned state.
    pub async fn join(
        &self,
        id: PlayerId,
        request: JoinRequest,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Joined, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::Join { id, request, outbound, reply }).await?;
        Ok(rx.await.map_err(|_| CoordinatorError::Closed)??)
    }

    /// Forward a movement report.
    pub async fn position_update(&self, id: PlayerId, update: PositionUpdate) -> Result<(), CoordinatorError> {
        self.send(CoordinatorCommand::PositionUpdate { id, update }).await
    }

    /// Remove a player.
    pub async fn leave(&self, id: PlayerId) -> Result<(), CoordinatorError> {
        self.send(CoordinatorCommand::Leave { id }).await
    }

    /// Ask for a verification challenge.
    pub async fn verify(&self, id: PlayerId) -> Result<(), CoordinatorError> {
        self.send(CoordinatorCommand::Verify { id }).await
    }

    /// Forward a challenge answer.
    pub async fn state_response(&self, id: PlayerId, response: ClientStateResponse) -> Result<(), CoordinatorError> {
        self.send(CoordinatorCommand::StateResponse { id, response }).await
    }

    /// Current roster.
    pub async fn snapshot(&self) -> Result<Vec<Player>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }
}

/// Spawn the coordinator task.
///
/// Returns the handle and the task's join handle. The task stops when every
/// handle is dropped or `shutdown` fires.
pub fn spawn_coordinator(
    coordinator: Coordinator,
    sweep_interval: Duration,
    shutdown: broadcast::Receiver<()>,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run_coordinator(coordinator, rx, sweep_interval, shutdown));
    (CoordinatorHandle { tx }, task)
}

/// A joined connection as seen by the task.
#[derive(Debug)]
struct Peer {
    outbound: mpsc::Sender<ServerMessage>,
    evict: oneshot::Sender<()>,
}

type Peers = BTreeMap<PlayerId, Peer>;

async fn run_coordinator(
    mut coordinator: Coordinator,
    mut commands: mpsc::Receiver<CoordinatorCommand>,
    sweep_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut peers = Peers::new();
    let mut sweep = interval(sweep_interval.max(Duration::from_millis(10)));

    info!("Coordinator started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                handle_command(&mut coordinator, &mut peers, command);
            }
            _ = sweep.tick() => {
                let expired = coordinator.sweep(Instant::now());
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Expired verification requests");
                }
            }
            _ = shutdown.recv() => {
                info!("Coordinator shutting down");
                break;
            }
        }
    }

    info!(connected = coordinator.registry().len(), "Coordinator stopped");
}

fn handle_command(coordinator: &mut Coordinator, peers: &mut Peers, command: CoordinatorCommand) {
    match command {
        CoordinatorCommand::Join { id, request, outbound, reply } => {
            match coordinator.join(id.clone(), request) {
                Ok((player, out)) => {
                    let (evict, evicted) = oneshot::channel();
                    peers.insert(id, Peer { outbound, evict });
                    deliver(coordinator, peers, out);
                    let _ = reply.send(Ok(Joined { player, evicted }));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }
        CoordinatorCommand::PositionUpdate { id, update } => {
            let out = coordinator.position_update(&id, update);
            deliver(coordinator, peers, out);
        }
        CoordinatorCommand::Leave { id } => {
            let out = coordinator.leave(&id);
            peers.remove(&id);
            deliver(coordinator, peers, out);
        }
        CoordinatorCommand::Verify { id } => {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let out = coordinator.challenge(&id, Instant::now(), timestamp);
            deliver(coordinator, peers, out);
        }
        CoordinatorCommand::StateResponse { id, response } => {
            let (outcome, out) = coordinator.state_response(&id, &response, Instant::now());
            debug!(player = %id.short(), outcome = ?outcome, "Verification response processed");
            deliver(coordinator, peers, out);
        }
        CoordinatorCommand::Snapshot { reply } => {
            let _ = reply.send(coordinator.registry().snapshot());
        }
    }
}

/// Result of queueing one message for one peer.
#[derive(Debug, PartialEq)]
enum Delivery {
    Queued,
    Shed,
    Stalled,
    Closed,
}

/// Messages a lagging peer can miss without its view going stale for good.
fn is_transient(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::PlayerMoved(_) | ServerMessage::StateVerification(_))
}

/// Push messages into peer channels without waiting.
///
/// Evicting a stalled peer broadcasts its departure, which is delivered in
/// the same pass.
fn deliver(coordinator: &mut Coordinator, peers: &mut Peers, out: Vec<Outbound>) {
    let mut pending: VecDeque<Outbound> = out.into();

    while let Some(Outbound { to, message }) = pending.pop_front() {
        let targets: Vec<PlayerId> = match to {
            Recipient::Player(id) => vec![id],
            Recipient::AllExcept(skip) => peers.keys().filter(|id| **id != skip).cloned().collect(),
        };

        for id in targets {
            let Some(peer) = peers.get(&id) else { continue };
            if try_deliver(&id, &peer.outbound, message.clone()) != Delivery::Stalled {
                continue;
            }
            if let Some(peer) = peers.remove(&id) {
                warn!(player = %id.short(), event = message.event_name(), "Outbound queue stalled, evicting");
                let _ = peer.evict.send(());
                pending.extend(coordinator.leave(&id));
            }
        }
    }
}

fn try_deliver(id: &PlayerId, tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> Delivery {
    #[cfg(feature = "debug-tracing")]
    tracing::trace!(player = %id.short(), event = message.event_name(), "Queue outbound");

    match tx.try_send(message) {
        Ok(()) => Delivery::Queued,
        Err(mpsc::error::TrySendError::Full(m)) if is_transient(&m) => {
            debug!(player = %id.short(), event = m.event_name(), "Outbound queue full, shedding");
            Delivery::Shed
        }
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Stalled,
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(player = %id.short(), "Outbound channel closed");
            Delivery::Closed
        }
    }
}
