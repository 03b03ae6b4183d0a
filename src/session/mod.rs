//! Per-player connection bookkeeping
//!
//! `Connecting -> Active -> Closed`. A closed session is removed outright;
//! a reconnecting player gets a fresh session id.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::NetError;
use crate::snapshot::EntityId;
use crate::util::time::Timestamp;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    IdleTimeout,
    Disconnected,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport up, not yet in the simulation
    Connecting,
    /// Controls an entity
    Active,
    Closed(CloseReason),
}

/// Smoothed round-trip estimate (RFC 6298 style)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RttEstimator {
    srtt_ms: Option<f64>,
    rttvar_ms: f64,
}

impl RttEstimator {
    pub fn record(&mut self, sample_ms: f64) {
        match self.srtt_ms {
            None => {
                self.srtt_ms = Some(sample_ms);
                self.rttvar_ms = sample_ms / 2.0;
            }
            Some(srtt) => {
                self.rttvar_ms = 0.75 * self.rttvar_ms + 0.25 * (srtt - sample_ms).abs();
                self.srtt_ms = Some(0.875 * srtt + 0.125 * sample_ms);
            }
        }
    }

    pub fn srtt_ms(&self) -> Option<f64> {
        self.srtt_ms
    }

    pub fn rttvar_ms(&self) -> f64 {
        self.rttvar_ms
    }

    /// Interpolation delay that should ride out this link's jitter: never
    /// below `base_ms`, and at least two ticks plus four deviations.
    pub fn buffer_delay_hint(&self, base_ms: u64, tick_interval_ms: u64) -> u64 {
        let jitter = (2 * tick_interval_ms) as f64 + 4.0 * self.rttvar_ms;
        base_ms.max(jitter.ceil() as u64)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: Uuid,
    pub session_id: Uuid,
    pub state: SessionState,
    pub entity: Option<EntityId>,
    /// Highest input sequence the server has applied for this player
    pub last_acked_sequence: u32,
    pub rtt: RttEstimator,
    pub last_seen: Timestamp,
    pub opened_at: Timestamp,
}

/// Lifecycle transitions reported upward to the game-logic layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened {
        player_id: Uuid,
        session_id: Uuid,
    },
    Activated {
        player_id: Uuid,
        entity: EntityId,
    },
    Closed {
        player_id: Uuid,
        session_id: Uuid,
        entity: Option<EntityId>,
        reason: CloseReason,
    },
}

pub struct SessionManager {
    sessions: DashMap<Uuid, Session>,
    idle_timeout_ms: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            sessions: DashMap::new(),
            idle_timeout_ms: idle_timeout.as_millis() as u64,
            events,
        }
    }

    /// Receive lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, player_id: &Uuid) -> Option<Session> {
        self.sessions.get(player_id).map(|s| s.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state == SessionState::Active)
            .count()
    }

    /// Start a new session in `Connecting`
    pub fn open(&self, player_id: Uuid, now: Timestamp) -> Result<Uuid, NetError> {
        let session_id = Uuid::new_v4();
        match self.sessions.entry(player_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(NetError::DuplicateSession(player_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Session {
                    player_id,
                    session_id,
                    state: SessionState::Connecting,
                    entity: None,
                    last_acked_sequence: 0,
                    rtt: RttEstimator::default(),
                    last_seen: now,
                    opened_at: now,
                });
            }
        }
        debug!(player_id = %player_id, session_id = %session_id, "Session opened");
        self.emit(SessionEvent::Opened {
            player_id,
            session_id,
        });
        Ok(session_id)
    }

    /// `Connecting -> Active` once the player's entity exists
    pub fn activate(&self, player_id: &Uuid, entity: EntityId, now: Timestamp) -> Result<(), NetError> {
        {
            let mut session = self
                .sessions
                .get_mut(player_id)
                .ok_or(NetError::UnknownSession(*player_id))?;
            session.state = SessionState::Active;
            session.entity = Some(entity);
            session.last_seen = now;
        }
        info!(player_id = %player_id, entity, "Session active");
        self.emit(SessionEvent::Activated {
            player_id: *player_id,
            entity,
        });
        Ok(())
    }

    /// Record inbound traffic
    pub fn touch(&self, player_id: &Uuid, now: Timestamp) -> Result<(), NetError> {
        let mut session = self
            .sessions
            .get_mut(player_id)
            .ok_or(NetError::UnknownSession(*player_id))?;
        session.last_seen = session.last_seen.max(now);
        Ok(())
    }

    pub fn record_applied(&self, player_id: &Uuid, sequence: u32) {
        if let Some(mut session) = self.sessions.get_mut(player_id) {
            session.last_acked_sequence = session.last_acked_sequence.max(sequence);
        }
    }

    pub fn record_rtt_sample(&self, player_id: &Uuid, sample_ms: f64) -> Option<RttEstimator> {
        let mut session = self.sessions.get_mut(player_id)?;
        session.rtt.record(sample_ms);
        Some(session.rtt)
    }

    /// End a session. Returns the final record with `state = Closed`.
    pub fn close(&self, player_id: &Uuid, reason: CloseReason) -> Option<Session> {
        let (_, mut session) = self.sessions.remove(player_id)?;
        session.state = SessionState::Closed(reason);
        info!(
            player_id = %player_id,
            session_id = %session.session_id,
            reason = reason.as_str(),
            "Session closed"
        );
        self.emit(SessionEvent::Closed {
            player_id: *player_id,
            session_id: session.session_id,
            entity: session.entity,
            reason,
        });
        Some(session)
    }

    /// Close every session silent for longer than the idle timeout
    pub fn sweep_idle(&self, now: Timestamp) -> Vec<Session> {
        let timeout = self.idle_timeout_ms;
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| now.saturating_sub(s.last_seen) > timeout)
            .map(|s| *s.key())
            .collect();

        idle.into_iter()
            .filter(|id| {
                // Traffic may have arrived since the scan
                self.sessions
                    .get(id)
                    .map(|s| now.saturating_sub(s.last_seen) > timeout)
                    .unwrap_or(false)
            })
            .filter_map(|id| self.close(&id, CloseReason::IdleTimeout))
            .collect()
    }
}
