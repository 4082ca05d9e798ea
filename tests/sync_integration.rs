//! Integration tests for the sync server
//!
//! Every test runs a real server on an ephemeral localhost port and talks to
//! it over WebSocket.

use std::net::SocketAddr;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use neon_sync::client::{ClientEvent, ClientPhase, ClientSyncState, ConnectionStatus, SyncClient};
use neon_sync::core::color::{colors_are_distinct, PALETTE};
use neon_sync::game::verifier::ClientStateResponse;
use neon_sync::network::protocol::{ClientMessage, ErrorCode, JoinRequest, PositionUpdate, ServerMessage};
use neon_sync::{Player, Position, Rotation, ServerConfig, SyncServer};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    url: String,
    shutdown: broadcast::Sender<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

async fn start_server(tweak: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut config = ServerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        pool_seed: Some(7),
        ..ServerConfig::default()
    };
    tweak(&mut config);

    let server = SyncServer::bind(config).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.run());

    TestServer { url, shutdown }
}

/// Connected client with its sync state, pumped by the test.
struct TestClient {
    conn: SyncClient,
    state: ClientSyncState,
}

impl TestClient {
    async fn join(url: &str, position: Option<Position>) -> Self {
        let mut conn = SyncClient::connect(url).await.unwrap();
        let mut state = ClientSyncState::new();

        let hint = JoinRequest { position, rotation: None };
        match timeout(WAIT, conn.next_event()).await.unwrap() {
            Some(ClientEvent::Status(status)) => {
                let join = state.on_status(status, hint).unwrap();
                conn.send(join).await.unwrap();
            }
            other => panic!("expected status event, got {:?}", other),
        }

        let mut client = Self { conn, state };
        client.pump_until(|s, _| s.phase() == ClientPhase::Active).await;
        client
    }

    fn me(&self) -> &Player {
        self.state.local()
    }

    /// Apply messages until `done` holds; returns the message that satisfied it.
    async fn pump_until(&mut self, mut done: impl FnMut(&ClientSyncState, &ServerMessage) -> bool) -> ServerMessage {
        loop {
            let msg = timeout(WAIT, self.conn.next_message())
                .await
                .expect("timed out waiting for server")
                .expect("connection closed");
            if let Some(reply) = self.state.handle(msg.clone()) {
                self.conn.send(reply).await.unwrap();
            }
            if done(&self.state, &msg) {
                return msg;
            }
        }
    }

    async fn next_raw(&mut self) -> ServerMessage {
        timeout(WAIT, self.conn.next_message())
            .await
            .expect("timed out waiting for server")
            .expect("connection closed")
    }
}

#[tokio::test]
async fn joined_and_players_list_agree() {
    let server = start_server(|_| {}).await;

    let a = TestClient::join(&server.url, Some(Position::new(1.0, 0.0, 1.0))).await;
    let b = TestClient::join(&server.url, None).await;
    let c = TestClient::join(&server.url, None).await;

    assert!(colors_are_distinct(a.me().color, b.me().color));
    assert!(colors_are_distinct(b.me().color, c.me().color));
    assert_eq!(a.me().position, Position::new(1.0, 0.0, 1.0));

    // C learned about A and B from players_list
    assert_eq!(c.state.remote_count(), 2);
    assert_eq!(c.state.remote(&a.me().id), Some(a.me()));
    assert_eq!(c.state.remote(&b.me().id), Some(b.me()));
    assert!(c.state.map().is_some());
}

#[tokio::test]
async fn first_joiner_gets_first_palette_color() {
    let server = start_server(|_| {}).await;
    let a = TestClient::join(&server.url, None).await;
    let b = TestClient::join(&server.url, None).await;

    assert_eq!(a.me().color, PALETTE[0]);
    assert_eq!(b.me().color, PALETTE[1]);
}

#[tokio::test]
async fn position_update_reaches_peer() {
    let server = start_server(|_| {}).await;
    let mut a = TestClient::join(&server.url, None).await;
    let mut b = TestClient::join(&server.url, None).await;

    // A learns about B
    let b_id = b.me().id.clone();
    a.pump_until(|s, _| s.remote(&b_id).is_some()).await;

    let update = a.state.move_local(Position::new(10.0, 0.0, 10.0), Rotation::IDENTITY).unwrap();
    a.conn.send(update).await.unwrap();

    let a_id = a.me().id.clone();
    let msg = b
        .pump_until(|_, m| matches!(m, ServerMessage::PlayerMoved(moved) if moved.id == a_id))
        .await;
    match msg {
        ServerMessage::PlayerMoved(moved) => assert_eq!(moved.position, Position::new(10.0, 0.0, 10.0)),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(b.state.remote(&a_id).unwrap().position, Position::new(10.0, 0.0, 10.0));
}

#[tokio::test]
async fn disconnect_broadcasts_leave_and_frees_color() {
    let server = start_server(|_| {}).await;
    let a = TestClient::join(&server.url, None).await;
    let mut b = TestClient::join(&server.url, None).await;

    let a_id = a.me().id.clone();
    let a_color = a.me().color;
    a.conn.close().await;

    b.pump_until(|_, m| matches!(m, ServerMessage::PlayerLeft(id) if *id == a_id)).await;
    assert!(b.state.remote(&a_id).is_none());

    let c = TestClient::join(&server.url, None).await;
    assert!(c.state.remote(&a_id).is_none());
    assert_eq!(c.state.remote_count(), 1);
    assert_eq!(c.me().color, a_color);
}

#[tokio::test]
async fn voluntary_leave_is_broadcast() {
    let server = start_server(|_| {}).await;
    let mut a = TestClient::join(&server.url, None).await;
    let mut b = TestClient::join(&server.url, None).await;

    let a_id = a.me().id.clone();
    let leave = a.state.leave().unwrap();
    a.conn.send(leave).await.unwrap();
    assert_eq!(a.state.local().color, neon_sync::NEUTRAL_GRAY);

    b.pump_until(|_, m| matches!(m, ServerMessage::PlayerLeft(id) if *id == a_id)).await;
    assert_eq!(b.state.remote_count(), 0);
}

#[tokio::test]
async fn drifted_client_is_corrected() {
    let server = start_server(|config| {
        config.verifier.interval = Duration::from_millis(100);
    })
    .await;
    let mut a = TestClient::join(&server.url, Some(Position::ZERO)).await;

    // Answer the challenge with a lie instead of the real local state
    let challenge = loop {
        if let ServerMessage::StateVerification(v) = a.next_raw().await {
            break v;
        }
    };
    assert_eq!(challenge.expected.position, Position::ZERO);

    let lie = ClientStateResponse {
        position: Position::new(5.0, 5.0, 5.0),
        color: a.me().color,
        timestamp: challenge.timestamp,
    };
    a.conn.send(ClientMessage::ClientStateResponse(lie)).await.unwrap();

    let fix = loop {
        if let ServerMessage::ForceStateCorrection(fix) = a.next_raw().await {
            break fix;
        }
    };
    assert_eq!(fix.position, Position::ZERO);
    assert_eq!(fix.color, a.me().color);

    a.state.apply_correction(&fix);
    assert_eq!(a.state.local().position, Position::ZERO);
}

#[tokio::test]
async fn honest_client_is_never_corrected() {
    let server = start_server(|config| {
        config.verifier.interval = Duration::from_millis(50);
    })
    .await;
    let mut a = TestClient::join(&server.url, None).await;

    // Let a few challenges go by; the state machine answers truthfully
    for _ in 0..4 {
        a.pump_until(|_, m| matches!(m, ServerMessage::StateVerification(_))).await;
    }
    assert_eq!(a.state.corrections(), 0);
}

#[tokio::test]
async fn rejoin_after_leave_does_not_burst_challenges() {
    let server = start_server(|config| {
        config.verifier.interval = Duration::from_millis(100);
    })
    .await;
    let mut a = TestClient::join(&server.url, None).await;

    let leave = a.state.leave().unwrap();
    a.conn.send(leave).await.unwrap();

    // Stay out for several periods, then drop whatever was queued before the leave
    tokio::time::sleep(Duration::from_millis(600)).await;
    while let Ok(Some(_)) = timeout(Duration::from_millis(20), a.conn.next_message()).await {}

    let join = a.state.on_status(ConnectionStatus::Connected, JoinRequest::default()).unwrap();
    a.conn.send(join).await.unwrap();
    a.pump_until(|s, _| s.phase() == ClientPhase::Active).await;

    let mut challenges = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
    while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, a.conn.next_message()).await {
        if matches!(msg, ServerMessage::StateVerification(_)) {
            challenges += 1;
        }
    }
    assert!(challenges <= 1, "{} challenges right after rejoining", challenges);
}

#[tokio::test]
async fn duplicate_join_is_rejected_but_connection_survives() {
    let server = start_server(|_| {}).await;
    let mut a = TestClient::join(&server.url, None).await;

    a.conn.send(ClientMessage::PlayerJoin(JoinRequest::default())).await.unwrap();
    let msg = a.pump_until(|_, m| matches!(m, ServerMessage::Error(_))).await;
    assert!(matches!(msg, ServerMessage::Error(e) if e.code == ErrorCode::DuplicateConnection));

    // Still connected: a second client shows up in our roster
    let b = TestClient::join(&server.url, None).await;
    let b_id = b.me().id.clone();
    a.pump_until(|s, _| s.remote(&b_id).is_some()).await;
}

#[tokio::test]
async fn invalid_frames_get_error_and_no_broadcast() {
    let server = start_server(|_| {}).await;
    let (mut ws, _) = connect_async(server.url.as_str()).await.unwrap();

    ws.send(Message::Text("definitely not json".to_string())).await.unwrap();
    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let text = frame.into_text().unwrap();
    match ServerMessage::from_json(&text).unwrap() {
        ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::InvalidMessage),
        other => panic!("unexpected {:?}", other),
    }

    // Update before join
    let update = ClientMessage::PositionUpdate(PositionUpdate {
        position: Position::new(1.0, 0.0, 1.0),
        rotation: Rotation::IDENTITY,
    });
    ws.send(Message::Text(update.to_json().unwrap())).await.unwrap();
    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    match ServerMessage::from_json(&frame.into_text().unwrap()).unwrap() {
        ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::NotJoined),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn connection_limit_rejects_extra_clients() {
    let server = start_server(|config| config.max_connections = 1).await;
    let _a = TestClient::join(&server.url, None).await;

    let (mut ws, _) = connect_async(server.url.as_str()).await.unwrap();
    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    match ServerMessage::from_json(&frame.into_text().unwrap()).unwrap() {
        ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::ServerFull),
        other => panic!("unexpected {:?}", other),
    }
}
