//! State Verification
//!
//! Periodically challenges a client to report what it believes its own color
//! and position are, then compares the answer with what the server expected
//! at challenge time.
//!
//! ## Flow
//!
//! ```text
//! server                         client
//!   │── state_verification ───────▶│   challenge(): pending request stored
//!   │◀── client_state_response ────│   on_client_response(): drift computed
//!   │── force_state_correction ───▶│   only when drift >= tolerance
//! ```
//!
//! A request is dropped when answered, replaced by a newer challenge,
//! forgotten on leave, or swept by `expire()` after `response_timeout`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::color::{color_distance, Color};
use crate::core::vec3::Position;
use crate::game::player::{Player, PlayerId};

// =============================================================================
// CONFIG
// =============================================================================

/// Verification tuning.
#[derive(Clone, Debug)]
pub struct VerifierConfig {
    /// Position drift (world units) that triggers a correction
    pub position_tolerance: f32,
    /// Color drift (max channel difference) that triggers a correction
    pub color_tolerance: f32,
    /// Unanswered challenges are abandoned after this long
    pub response_timeout: Duration,
    /// Time between challenges on one connection
    pub interval: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 0.5,
            color_tolerance: 0.05,
            response_timeout: Duration::from_secs(5),
            interval: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// What the server believes the client's state is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpectedState {
    /// Player being verified
    pub id: PlayerId,
    /// Authoritative position at challenge time
    pub position: Position,
    /// Authoritative color at challenge time
    pub color: Color,
}

/// `state_verification` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateVerification {
    /// Expected state
    pub expected: ExpectedState,
    /// Challenge timestamp (ms since epoch), echoed by the client
    pub timestamp: i64,
}

/// `client_state_response` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientStateResponse {
    /// Client's local position
    pub position: Position,
    /// Client's local color
    pub color: Color,
    /// Timestamp of the challenge being answered
    pub timestamp: i64,
}

/// `force_state_correction` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForceStateCorrection {
    /// Authoritative position
    pub position: Position,
    /// Authoritative color
    pub color: Color,
}

impl ForceStateCorrection {
    /// Correction carrying the player's current authoritative state.
    pub fn from_player(player: &Player) -> Self {
        Self {
            position: player.position,
            color: player.color,
        }
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Measured difference between expected and reported state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftReport {
    /// Euclidean position difference
    pub position_drift: f32,
    /// Max per-channel color difference
    pub color_drift: f32,
    /// Either drift reached its tolerance
    pub needs_correction: bool,
}

/// Result of processing a `client_state_response`.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationOutcome {
    /// Client agrees with the server
    InSync(DriftReport),
    /// Client drifted; send the correction
    Corrected {
        /// Measured drift
        report: DriftReport,
        /// Correction to push to the client
        correction: ForceStateCorrection,
    },
    /// Answer arrived after the timeout; abandoned
    Expired,
    /// No matching challenge; ignored
    Unsolicited,
}

/// Compare a report against an expectation.
pub fn compute_drift(
    expected_position: Position,
    expected_color: Color,
    reported_position: Position,
    reported_color: Color,
    config: &VerifierConfig,
) -> DriftReport {
    let position_drift = expected_position.distance(reported_position);
    let color_drift = color_distance(expected_color, reported_color);
    // NaN drift means the client reported garbage
    let needs_correction = position_drift.is_nan()
        || color_drift.is_nan()
        || position_drift >= config.position_tolerance
        || color_drift >= config.color_tolerance;

    DriftReport { position_drift, color_drift, needs_correction }
}

// =============================================================================
// VERIFIER
// =============================================================================

#[derive(Clone, Debug)]
struct PendingRequest {
    expected: ExpectedState,
    timestamp: i64,
    issued_at: Instant,
}

/// Tracks outstanding verification challenges.
#[derive(Debug, Default)]
pub struct StateVerifier {
    config: VerifierConfig,
    pending: BTreeMap<PlayerId, PendingRequest>,
}

impl StateVerifier {
    /// Create a verifier.
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
        }
    }

    /// Tuning in use.
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Record a challenge for `player`, replacing any older one.
    pub fn challenge(&mut self, player: &Player, now: Instant, timestamp: i64) -> StateVerification {
        let expected = ExpectedState {
            id: player.id.clone(),
            position: player.position,
            color: player.color,
        };

        let replaced = self.pending.insert(
            player.id.clone(),
            PendingRequest { expected: expected.clone(), timestamp, issued_at: now },
        );
        if replaced.is_some() {
            debug!(player = %player.id.short(), "Unanswered challenge replaced");
        }

        StateVerification { expected, timestamp }
    }

    /// Process a client's answer.
    ///
    /// `authoritative` is the player's current registry state, used for the
    /// correction payload.
    pub fn on_client_response(
        &mut self,
        id: &PlayerId,
        response: &ClientStateResponse,
        authoritative: &Player,
        now: Instant,
    ) -> VerificationOutcome {
        let matches = self
            .pending
            .get(id)
            .is_some_and(|p| p.timestamp == response.timestamp);
        if !matches {
            debug!(player = %id.short(), timestamp = response.timestamp, "Unsolicited state response");
            return VerificationOutcome::Unsolicited;
        }

        let Some(request) = self.pending.remove(id) else {
            return VerificationOutcome::Unsolicited;
        };

        if now.saturating_duration_since(request.issued_at) > self.config.response_timeout {
            debug!(player = %id.short(), "State response arrived after timeout");
            return VerificationOutcome::Expired;
        }

        let report = compute_drift(
            request.expected.position,
            request.expected.color,
            response.position,
            response.color,
            &self.config,
        );

        if report.needs_correction {
            info!(
                player = %id.short(),
                position_drift = report.position_drift,
                color_drift = report.color_drift,
                "Client drifted, issuing correction"
            );
            VerificationOutcome::Corrected {
                report,
                correction: ForceStateCorrection::from_player(authoritative),
            }
        } else {
            VerificationOutcome::InSync(report)
        }
    }

    /// Drop every request older than the response timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<PlayerId> {
        let timeout = self.config.response_timeout;
        let expired: Vec<PlayerId> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.issued_at) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.pending.remove(id);
            debug!(player = %id.short(), "Verification request expired");
        }
        expired
    }

    /// Drop any pending request for `id`.
    pub fn forget(&mut self, id: &PlayerId) {
        self.pending.remove(id);
    }

    /// True if `id` has an unanswered challenge.
    pub fn is_pending(&self, id: &PlayerId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of unanswered challenges.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
