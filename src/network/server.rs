//! WebSocket Sync Server
//!
//! Accepts WebSocket connections, gives each one a player id and translates
//! its frames into coordinator requests. Each connection runs its own
//! verification timer with a random initial offset so challenges never fire
//! for every player at once.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::core::rng::derive_map_seed;
use crate::game::map::{MapConfig, MapData};
use crate::game::player::PlayerId;
use crate::game::registry::{RegistryConfig, RegistryError};
use crate::game::verifier::VerifierConfig;
use crate::network::coordinator::{spawn_coordinator, Coordinator, CoordinatorError, CoordinatorHandle};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are dropped.
    pub connection_timeout: Duration,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// How often stale verification requests are swept.
    pub sweep_interval: Duration,
    /// Seed for colors and spawns. Random when unset.
    pub pool_seed: Option<u64>,
    /// World layout.
    pub map: MapConfig,
    /// Registry tuning.
    pub registry: RegistryConfig,
    /// Verification tuning.
    pub verifier: VerifierConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 256,
            connection_timeout: Duration::from_secs(30),
            outbound_buffer: 64,
            sweep_interval: Duration::from_secs(1),
            pool_seed: None,
            map: MapConfig::default(),
            registry: RegistryConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `SYNC_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let map = MapConfig {
            seed: std::env::var("SYNC_MAP_SEED")
                .map(|v| derive_map_seed(&v))
                .unwrap_or(defaults.map.seed),
            world_size: env_or("SYNC_WORLD_SIZE", defaults.map.world_size),
            obstacle_count: env_or("SYNC_OBSTACLE_COUNT", defaults.map.obstacle_count),
        };

        let verifier = VerifierConfig {
            position_tolerance: env_or("SYNC_POSITION_TOLERANCE", defaults.verifier.position_tolerance),
            color_tolerance: env_or("SYNC_COLOR_TOLERANCE", defaults.verifier.color_tolerance),
            response_timeout: Duration::from_millis(env_or(
                "SYNC_VERIFY_TIMEOUT_MS",
                defaults.verifier.response_timeout.as_millis() as u64,
            )),
            interval: Duration::from_millis(env_or(
                "SYNC_VERIFY_INTERVAL_MS",
                defaults.verifier.interval.as_millis() as u64,
            )),
        };

        Self {
            bind_addr: env_or("SYNC_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("SYNC_MAX_CONNECTIONS", defaults.max_connections),
            connection_timeout: Duration::from_secs(env_or(
                "SYNC_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout.as_secs(),
            )),
            map,
            verifier,
            ..defaults
        }
    }
}

/// Parse an environment variable, warning and falling back on bad input.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Sync server errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Coordinator error.
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    listener: TcpListener,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(config: ServerConfig) -> Result<Self, SyncServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, SyncServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender that stops the server (and every connection) when fired.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(self) -> Result<(), SyncServerError> {
        let map = Arc::new(MapData::generate(&self.config.map));
        info!(
            seed = map.seed,
            obstacles = map.obstacles.len(),
            fingerprint = %map.fingerprint_hex(),
            "Map generated"
        );

        let seed = self.config.pool_seed.unwrap_or_else(rand::random);
        let coordinator = Coordinator::new(
            self.config.registry.clone(),
            self.config.verifier.clone(),
            map,
            seed,
        );
        let (handle, coordinator_task) = spawn_coordinator(
            coordinator,
            self.config.sweep_interval,
            self.shutdown_tx.subscribe(),
        );

        info!("Sync server listening on {}", self.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(reject_connection(stream, addr));
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.connections.fetch_add(1, Ordering::SeqCst);
                            self.handle_connection(stream, addr, handle.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(handle);
        if let Err(e) = coordinator_task.await {
            error!("Coordinator task failed: {}", e);
        }

        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, coordinator: CoordinatorHandle) {
        let connection = Connection {
            id: PlayerId::generate(),
            addr,
            coordinator,
            config: self.config.clone(),
        };
        let connections = self.connections.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = connection.run(stream, shutdown_rx).await {
                debug!("Connection {} ended with error: {}", addr, e);
            }
            connections.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Handshake, send `server_full`, close.
async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let frame = ServerMessage::error(ErrorCode::ServerFull, "Connection limit reached").to_json();
    if let Ok(text) = frame {
        let _ = ws.send(Message::Text(text)).await;
    }
    let _ = ws.close(None).await;
    debug!("Rejected {}", addr);
}

// =============================================================================
// CONNECTION
// =============================================================================

struct Connection {
    id: PlayerId,
    addr: SocketAddr,
    coordinator: CoordinatorHandle,
    config: ServerConfig,
}

/// What the read loop should do after a frame.
enum Flow {
    Continue,
    Stop,
}

impl Connection {
    #[instrument(skip_all, fields(player = %self.id.short(), addr = %self.addr))]
    async fn run(
        self,
        stream: TcpStream,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), SyncServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(self.config.outbound_buffer);

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let period = self.config.verifier.interval.max(Duration::from_millis(10));
        let jitter_ms = rand::thread_rng().gen_range(0..period.as_millis().max(1) as u64);
        let mut verify = interval_at(Instant::now() + period + Duration::from_millis(jitter_ms), period);
        verify.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle = sleep(self.config.connection_timeout);
        tokio::pin!(idle);

        // Some while joined; fires if the coordinator evicts us
        let mut membership: Option<oneshot::Receiver<()>> = None;
        info!("Connected");

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            idle.as_mut().reset(Instant::now() + self.config.connection_timeout);

                            #[cfg(feature = "debug-tracing")]
                            tracing::trace!(frame = %text, "Inbound frame");

                            let flow = match ClientMessage::from_json(&text) {
                                Ok(message) => self.handle_message(message, &mut membership, &msg_tx).await,
                                Err(e) => {
                                    debug!("Invalid message: {}", e);
                                    send_error(&msg_tx, ErrorCode::InvalidMessage, "Invalid message format").await;
                                    Flow::Continue
                                }
                            };
                            if let Flow::Stop = flow {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client disconnected");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {
                            idle.as_mut().reset(Instant::now() + self.config.connection_timeout);
                        }
                    }
                }
                _ = verify.tick(), if membership.is_some() => {
                    if self.coordinator.verify(self.id.clone()).await.is_err() {
                        break;
                    }
                }
                evicted = async {
                    match membership.as_mut() {
                        Some(rx) => rx.await.is_ok(),
                        None => std::future::pending().await,
                    }
                } => {
                    if evicted {
                        warn!("Evicted for not keeping up with outbound messages");
                    } else {
                        debug!("Coordinator released this player");
                    }
                    break;
                }
                _ = &mut idle => {
                    info!("Idle timeout");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        // A disconnect is a single leave
        if membership.is_some() {
            let _ = self.coordinator.leave(self.id.clone()).await;
        }

        drop(msg_tx);
        if timeout(Duration::from_secs(1), sender_task).await.is_err() {
            debug!("Sender task did not drain in time");
        }

        info!("Connection closed");
        Ok(())
    }

    async fn handle_message(
        &self,
        message: ClientMessage,
        membership: &mut Option<oneshot::Receiver<()>>,
        msg_tx: &mpsc::Sender<ServerMessage>,
    ) -> Flow {
        match message {
            ClientMessage::PlayerJoin(request) => {
                if membership.is_some() {
                    send_error(msg_tx, ErrorCode::DuplicateConnection, "Already joined").await;
                    return Flow::Continue;
                }
                match self.coordinator.join(self.id.clone(), request, msg_tx.clone()).await {
                    Ok(joined) => {
                        *membership = Some(joined.evicted);
                        Flow::Continue
                    }
                    Err(CoordinatorError::Registry(e)) => {
                        let code = match e {
                            RegistryError::DuplicateConnection(_) => ErrorCode::DuplicateConnection,
                            RegistryError::MalformedUpdate { .. } => ErrorCode::MalformedUpdate,
                            RegistryError::UnknownPlayer(_) => ErrorCode::InternalError,
                        };
                        send_error(msg_tx, code, e.to_string()).await;
                        Flow::Continue
                    }
                    Err(CoordinatorError::Closed) => Flow::Stop,
                }
            }
            ClientMessage::PositionUpdate(update) => {
                if membership.is_none() {
                    send_error(msg_tx, ErrorCode::NotJoined, "Join before sending updates").await;
                    return Flow::Continue;
                }
                self.forward(self.coordinator.position_update(self.id.clone(), update).await)
            }
            ClientMessage::PlayerLeave(request) => {
                if request.id != self.id {
                    warn!(claimed = %request.id, "Ignoring leave for another player");
                    return Flow::Continue;
                }
                if membership.take().is_none() {
                    return Flow::Continue;
                }
                self.forward(self.coordinator.leave(self.id.clone()).await)
            }
            ClientMessage::ClientStateResponse(response) => {
                if membership.is_none() {
                    return Flow::Continue;
                }
                self.forward(self.coordinator.state_response(self.id.clone(), response).await)
            }
        }
    }

    fn forward(&self, result: Result<(), CoordinatorError>) -> Flow {
        match result {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!("Coordinator unavailable: {}", e);
                Flow::Stop
            }
        }
    }
}

async fn send_error(tx: &mpsc::Sender<ServerMessage>, code: ErrorCode, message: impl Into<String>) {
    let _ = tx.send(ServerMessage::error(code, message)).await;
}
