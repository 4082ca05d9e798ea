//! Headless sync bot.
//!
//! Joins a server, walks in a circle and answers verification challenges.
//! Useful as a second player when testing the browser client.
//!
//! Usage: `neon-sync-bot [ws://host:port] [radius]`

use std::time::Duration;
use anyhow::Context;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use neon_sync::client::{ClientEvent, ClientPhase, ClientSyncState, SyncClient};
use neon_sync::network::protocol::JoinRequest;
use neon_sync::{EulerAngles, Position};

const STEP: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "ws://127.0.0.1:3000".to_string());
    let radius: f32 = match args.next() {
        Some(raw) => raw.parse().context("radius must be a number")?,
        None => 8.0,
    };

    let mut client = SyncClient::connect(&url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    info!("Connected to {}", url);

    let mut state = ClientSyncState::new();
    let mut ticker = interval(STEP);
    let mut angle = 0.0f32;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = client.next_event() => {
                let Some(event) = event else { break };
                let reply = match event {
                    ClientEvent::Status(status) => {
                        info!(?status, "Connection status");
                        state.on_status(status, JoinRequest::default())
                    }
                    ClientEvent::Message(message) => state.handle(message),
                };
                if let Some(reply) = reply {
                    client.send(reply).await?;
                }
                if state.phase() == ClientPhase::Disconnected {
                    warn!("Lost connection");
                    break;
                }
            }
            _ = ticker.tick() => {
                if !state.is_joined() {
                    continue;
                }
                angle = (angle + 0.05) % std::f32::consts::TAU;
                let position = Position::new(radius * angle.cos(), 0.0, radius * angle.sin());
                let facing = EulerAngles::new(0.0, -angle, 0.0);
                if let Some(update) = state.move_local_euler(position, facing) {
                    client.send(update).await?;
                }
            }
            _ = &mut ctrl_c => {
                if let Some(leave) = state.leave() {
                    client.send(leave).await?;
                }
                break;
            }
        }
    }

    info!(corrections = state.corrections(), "Bot finished");
    client.close().await;
    Ok(())
}
