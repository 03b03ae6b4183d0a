//! Client-side netcode: prediction for the local entity, interpolation for
//! everything else, and a server clock estimate tying the two together.

pub mod clock;
pub mod interpolator;
pub mod predictor;

pub use clock::ClockSync;
pub use interpolator::{InterpolatedState, Interpolator};
pub use predictor::{CorrectionSmoothing, InputStatus, PredictedInput, Predictor, ReconcileOutcome};

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::game::physics::{InputModel, MotionState};
use crate::input::InputKind;
use crate::snapshot::{EntityId, Vec2, WorldSnapshot};
use crate::util::time::Timestamp;
use crate::ws::protocol::{ClientMsg, ServerMsg, StateUpdate};

/// Everything needed to draw one frame
#[derive(Debug, Clone, Default)]
pub struct RenderFrame {
    /// Predicted local entity
    pub own: Option<(EntityId, Vec2)>,
    /// Interpolated remote entities
    pub others: HashMap<EntityId, InterpolatedState>,
}

/// One client's view of the game, driven by server messages and local input.
///
/// Timestamps passed in are local clock readings; conversion to server time
/// happens here.
pub struct ClientSession<M: InputModel + Clone> {
    model: M,
    config: ClientConfig,
    player_id: Option<Uuid>,
    entity: Option<EntityId>,
    predictor: Option<Predictor<M>>,
    interpolator: Interpolator,
    clock: ClockSync,
    last_reconcile: Option<ReconcileOutcome>,
}

impl<M: InputModel + Clone> ClientSession<M> {
    pub fn new(model: M, config: ClientConfig) -> Self {
        let interpolator = Interpolator::new(config.interp_buffer_len, config.interp_buffer_delay_ms);
        Self {
            model,
            config,
            player_id: None,
            entity: None,
            predictor: None,
            interpolator,
            clock: ClockSync::new(),
            last_reconcile: None,
        }
    }

    pub fn player_id(&self) -> Option<Uuid> {
        self.player_id
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub fn predictor(&self) -> Option<&Predictor<M>> {
        self.predictor.as_ref()
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn last_reconcile(&self) -> Option<&ReconcileOutcome> {
        self.last_reconcile.as_ref()
    }

    /// Unacknowledged history overflowed; the connection should be treated as failed
    pub fn is_stalled(&self) -> bool {
        self.predictor.as_ref().is_some_and(|p| p.is_stalled())
    }

    /// Apply a server message. Returns a reply to send, if any.
    pub fn handle_server_msg(&mut self, msg: ServerMsg, local_now: Timestamp) -> Option<ClientMsg> {
        match msg {
            ServerMsg::Welcome {
                player_id,
                server_time,
                tick_rate_hz,
                interp_delay_ms,
            } => {
                info!(%player_id, tick_rate_hz, "Welcomed by server");
                self.player_id = Some(player_id);
                self.clock.on_welcome(server_time, local_now);
                self.interpolator.set_tick_interval(1_000 / u64::from(tick_rate_hz.max(1)));
                self.apply_buffer_delay(interp_delay_ms);
                Some(ClientMsg::Join)
            }
            ServerMsg::Joined { entity_id, tick } => {
                debug!(entity_id, tick, "Joined simulation");
                self.entity = Some(entity_id);
                self.predictor = None;
                self.interpolator.set_local_entity(Some(entity_id));
                None
            }
            ServerMsg::StateUpdate(update) => {
                self.on_state_update(update);
                None
            }
            ServerMsg::Ping { server_t } => Some(ClientMsg::Pong { server_t }),
            ServerMsg::Pong { t, server_time } => {
                self.clock.on_pong(t, server_time, local_now);
                None
            }
            ServerMsg::BufferDelay { interp_delay_ms } => {
                self.apply_buffer_delay(interp_delay_ms);
                None
            }
            ServerMsg::PlayerJoined { player_id, entity_id } => {
                debug!(%player_id, entity_id, "Player joined");
                None
            }
            ServerMsg::PlayerLeft { player_id, reason, .. } => {
                debug!(%player_id, %reason, "Player left");
                None
            }
            ServerMsg::Error { code, message } => {
                warn!(%code, %message, "Server error");
                None
            }
        }
    }

    fn apply_buffer_delay(&mut self, suggested_ms: u64) {
        let delay = suggested_ms.max(self.config.interp_buffer_delay_ms);
        self.interpolator.set_buffer_delay(delay);
    }

    fn on_state_update(&mut self, update: StateUpdate) {
        let own = self.entity.and_then(|id| update.entities.iter().find(|e| e.entity_id == id).copied());

        if let Some(own) = own {
            match self.predictor.as_mut() {
                None => {
                    let player_id = self.player_id.unwrap_or_else(Uuid::nil);
                    self.predictor = Some(Predictor::new(
                        self.model.clone(),
                        player_id,
                        MotionState::from(&own),
                        &self.config,
                    ));
                }
                Some(predictor) => match update.last_processed_seq {
                    Some(acked) => {
                        let outcome = predictor.reconcile(acked, &own);
                        if !matches!(outcome, ReconcileOutcome::Ignored { .. }) {
                            self.last_reconcile = Some(outcome);
                        }
                    }
                    // Nothing of ours applied yet; follow the server while idle
                    None if predictor.pending_len() == 0 => predictor.reset(MotionState::from(&own)),
                    None => {}
                },
            }
        }

        let snapshot = WorldSnapshot::from_entities(update.timestamp, update.tick, update.entities);
        self.interpolator.ingest(snapshot);
    }

    /// Predict `kind` locally and produce the message carrying it. `None`
    /// until the server has confirmed our entity.
    pub fn local_input(&mut self, kind: InputKind, local_now: Timestamp) -> Option<ClientMsg> {
        let observed = self.render_time(local_now);
        let predictor = self.predictor.as_mut()?;
        Some(ClientMsg::Input(predictor.apply_local(kind, observed)))
    }

    /// Clock sync probe
    pub fn ping(&self, local_now: Timestamp) -> ClientMsg {
        ClientMsg::Ping { t: local_now }
    }

    /// Server time at which remote entities are currently drawn; this is the
    /// timestamp attached to inputs for lag compensation.
    pub fn render_time(&self, local_now: Timestamp) -> Timestamp {
        self.clock
            .server_now(local_now)
            .saturating_sub(self.interpolator.buffer_delay_ms())
    }

    /// Advance correction smoothing by `dt` seconds
    pub fn advance(&mut self, dt: f32) {
        if let Some(p) = self.predictor.as_mut() {
            p.advance_smoothing(dt);
        }
    }

    pub fn render_frame(&self, local_now: Timestamp) -> RenderFrame {
        let own = match (self.entity, self.predictor.as_ref()) {
            (Some(id), Some(p)) => Some((id, p.render_position())),
            _ => None,
        };
        RenderFrame {
            own,
            others: self.interpolator.sample_at(self.render_time(local_now)),
        }
    }
}
