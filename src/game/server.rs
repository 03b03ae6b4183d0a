//! Authoritative tick loop
//!
//! Receiver tasks push [`Inbound`] messages into a bounded queue; the loop
//! drains it once per tick, applies commands in per-player sequence order,
//! steps the simulation, records the snapshot, and hands the result to
//! broadcaster tasks. It never awaits network I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::NetError;
use crate::input::{InputCommand, InputKind, InputRejection, PlayerInputQueue};
use crate::session::{CloseReason, SessionManager};
use crate::snapshot::{EntityId, SnapshotStore, Vec2};
use crate::util::time::{ServerClock, TickClock, Timestamp};
use crate::ws::protocol::ServerMsg;

use super::combat::{HitQuery, HitResult};
use super::lag_comp::{LagCompensator, RewindMode};
use super::snapshot::{SnapshotBuilder, TickBroadcast};
use super::world::Simulation;

const INBOUND_QUEUE_LEN: usize = 4096;
const OUTBOUND_QUEUE_LEN: usize = 64;

/// Messages from receiver tasks to the tick loop
#[derive(Debug)]
pub enum Inbound {
    Join {
        player_id: Uuid,
        /// Direct channel to this player's writer task
        reply: mpsc::Sender<ServerMsg>,
    },
    Input(InputCommand),
    Leave {
        player_id: Uuid,
    },
}

/// Messages from the tick loop to broadcaster tasks
#[derive(Debug, Clone)]
pub enum Outbound {
    Tick(TickBroadcast),
    Lifecycle(ServerMsg),
}

/// Cloneable handle used by connection tasks
#[derive(Clone)]
pub struct ServerHandle {
    inbound_tx: mpsc::Sender<Inbound>,
    outbound_tx: broadcast::Sender<Outbound>,
    store: Arc<SnapshotStore>,
    current_tick: Arc<AtomicU64>,
}

impl ServerHandle {
    /// Queue a message for the next tick without waiting.
    ///
    /// On a full queue an input is dropped, since input loss is already
    /// tolerated. Joins and leaves are refused with `InboundQueueFull`.
    pub fn submit(&self, msg: Inbound) -> Result<(), NetError> {
        match self.inbound_tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(Inbound::Input(dropped))) => {
                warn!(
                    player_id = %dropped.player_id,
                    seq = dropped.sequence,
                    "Inbound queue full, dropping input"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(refused)) => {
                warn!(msg = ?refused, "Inbound queue full, lifecycle message refused");
                Err(NetError::InboundQueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::ServerUnavailable),
        }
    }

    /// Queue a message, waiting for room if the queue is full. Used for
    /// joins and leaves, which must not be lost.
    pub async fn submit_wait(&self, msg: Inbound) -> Result<(), NetError> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| NetError::ServerUnavailable)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Relaxed)
    }
}

/// What one tick did
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub applied: usize,
    pub rejected: usize,
    /// Why each rejected input was refused
    pub rejections: Vec<(Uuid, InputRejection)>,
    pub hits: Vec<HitResult>,
    pub closed: Vec<Uuid>,
}

struct PlayerSlot {
    entity: EntityId,
    queue: PlayerInputQueue,
    direct: mpsc::Sender<ServerMsg>,
}

pub struct GameServer<S: Simulation> {
    tick_clock: TickClock,
    clock: ServerClock,
    max_pending_inputs: usize,
    sim: S,
    tick: u64,
    inbound_rx: mpsc::Receiver<Inbound>,
    outbound_tx: broadcast::Sender<Outbound>,
    lag: LagCompensator,
    sessions: Arc<SessionManager>,
    players: HashMap<Uuid, PlayerSlot>,
    /// Players with queued input this tick, in arrival order
    ready: Vec<Uuid>,
    builder: SnapshotBuilder,
    current_tick: Arc<AtomicU64>,
}

impl<S: Simulation> GameServer<S> {
    pub fn new(
        config: &Config,
        sim: S,
        sessions: Arc<SessionManager>,
        clock: ServerClock,
    ) -> (Self, ServerHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_LEN);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_QUEUE_LEN);
        let store = Arc::new(SnapshotStore::new(config.history_capacity()));
        let current_tick = Arc::new(AtomicU64::new(0));

        let mode = if config.lag_comp_interpolate {
            RewindMode::Interpolated
        } else {
            RewindMode::AtOrBefore
        };

        let handle = ServerHandle {
            inbound_tx,
            outbound_tx: outbound_tx.clone(),
            store: store.clone(),
            current_tick: current_tick.clone(),
        };

        let server = Self {
            tick_clock: config.tick_clock(),
            clock,
            max_pending_inputs: config.max_pending_inputs,
            sim,
            tick: 0,
            inbound_rx,
            outbound_tx,
            lag: LagCompensator::new(store, config.max_lag_comp_window(), mode),
            sessions,
            players: HashMap::new(),
            ready: Vec::new(),
            builder: SnapshotBuilder::new(),
            current_tick,
        };

        (server, handle)
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(
            tick_rate_hz = self.tick_clock.tick_rate_hz(),
            history = self.lag.store().capacity(),
            "Tick loop started"
        );

        let mut tick_interval = interval(self.tick_clock.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            let now = self.clock.now();
            let report = self.run_tick(now);
            if report.rejected > 0 || !report.closed.is_empty() {
                debug!(
                    tick = report.tick,
                    rejected = report.rejected,
                    closed = report.closed.len(),
                    "Tick summary"
                );
            }
        }
    }

    /// Advance the world by one tick at server time `now`
    pub fn run_tick(&mut self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();

        self.process_inbound(now, &mut report);

        for closed in self.sessions.sweep_idle(now) {
            self.remove_player(closed.player_id, closed.entity, CloseReason::IdleTimeout);
            report.closed.push(closed.player_id);
        }

        self.apply_inputs(now, &mut report);

        self.sim.step(self.tick_clock.tick_delta());
        self.tick += 1;
        self.current_tick.store(self.tick, Ordering::Relaxed);

        let snapshot = Arc::new(self.builder.build(&self.sim, self.tick, now));
        if let Err(e) = self.lag.record_snapshot(snapshot.clone()) {
            warn!(error = %e, tick = self.tick, "Snapshot not recorded");
        }

        let acks: HashMap<Uuid, u32> = self
            .players
            .iter()
            .filter(|(_, slot)| slot.queue.last_applied() > 0)
            .map(|(id, slot)| (*id, slot.queue.last_applied()))
            .collect();
        let owners: HashMap<Uuid, EntityId> =
            self.players.iter().map(|(id, slot)| (*id, slot.entity)).collect();

        // Nobody listening is fine
        let _ = self.outbound_tx.send(Outbound::Tick(TickBroadcast {
            snapshot,
            acks: Arc::new(acks),
            owners: Arc::new(owners),
        }));

        report.tick = self.tick;
        report
    }

    fn process_inbound(&mut self, now: Timestamp, report: &mut TickReport) {
        while let Ok(msg) = self.inbound_rx.try_recv() {
            match msg {
                Inbound::Join { player_id, reply } => self.handle_join(player_id, reply, now),
                Inbound::Input(command) => {
                    let player_id = command.player_id;
                    if let Err(reason) = self.handle_input(command) {
                        report.rejected += 1;
                        report.rejections.push((player_id, reason));
                    }
                }
                Inbound::Leave { player_id } => {
                    let closed = self.sessions.close(&player_id, CloseReason::Disconnected);
                    if closed.is_some() || self.players.contains_key(&player_id) {
                        let entity = closed.and_then(|s| s.entity);
                        self.remove_player(player_id, entity, CloseReason::Disconnected);
                        report.closed.push(player_id);
                    }
                }
            }
        }
    }

    /// Handle player join request
    fn handle_join(&mut self, player_id: Uuid, reply: mpsc::Sender<ServerMsg>, now: Timestamp) {
        if let Some(slot) = self.players.get(&player_id) {
            warn!(player_id = %player_id, "Player already joined");
            let _ = reply.try_send(ServerMsg::Joined {
                entity_id: slot.entity,
                tick: self.tick,
            });
            return;
        }

        if self.sessions.get(&player_id).is_none() {
            warn!(player_id = %player_id, "Join without an open session");
            let _ = reply.try_send(ServerMsg::error("no_session", "Session closed or unknown"));
            return;
        }

        let entity = self.sim.spawn_player(player_id);
        if let Err(e) = self.sessions.activate(&player_id, entity, now) {
            warn!(player_id = %player_id, error = %e, "Session vanished during join");
            self.sim.despawn_player(player_id, entity);
            return;
        }

        let _ = reply.try_send(ServerMsg::Joined {
            entity_id: entity,
            tick: self.tick,
        });
        self.players.insert(
            player_id,
            PlayerSlot {
                entity,
                queue: PlayerInputQueue::new(self.max_pending_inputs),
                direct: reply,
            },
        );
        let _ = self
            .outbound_tx
            .send(Outbound::Lifecycle(ServerMsg::PlayerJoined {
                player_id,
                entity_id: entity,
            }));

        info!(
            player_id = %player_id,
            entity,
            player_count = self.players.len(),
            "Player joined"
        );
    }

    /// Queue one command for this tick
    fn handle_input(&mut self, command: InputCommand) -> Result<(), InputRejection> {
        let player_id = command.player_id;
        let Some(slot) = self.players.get_mut(&player_id) else {
            debug!(player_id = %player_id, "Input from player without an entity");
            return Err(InputRejection::UnknownPlayer);
        };

        let was_idle = slot.queue.pending_len() == 0;
        let seq = command.sequence;
        match slot.queue.push(command) {
            Ok(()) => {
                if was_idle {
                    self.ready.push(player_id);
                }
                Ok(())
            }
            Err(reason @ (InputRejection::Stale { .. } | InputRejection::Duplicate(_))) => {
                debug!(player_id = %player_id, seq, reason = %reason, "Dropped late input");
                Err(reason)
            }
            Err(reason) => {
                warn!(player_id = %player_id, seq, reason = %reason, "Rejected input");
                let _ = slot
                    .direct
                    .try_send(ServerMsg::error("input_rejected", reason.to_string()));
                Err(reason)
            }
        }
    }

    fn apply_inputs(&mut self, now: Timestamp, report: &mut TickReport) {
        for player_id in std::mem::take(&mut self.ready) {
            let Some(slot) = self.players.get_mut(&player_id) else {
                continue;
            };
            let entity = slot.entity;
            let commands = slot.queue.drain_ordered();
            let last_applied = slot.queue.last_applied();

            for command in &commands {
                self.sim.apply_input(entity, command);
                report.applied += 1;

                if let InputKind::Attack { aim, range } = command.kind {
                    if let Some(hit) = self.resolve_attack(player_id, entity, aim, range, command, now) {
                        self.sim.apply_hit(&hit);
                        report.hits.push(hit);
                    }
                }
            }

            self.sessions.record_applied(&player_id, last_applied);
        }
    }

    fn resolve_attack(
        &self,
        player_id: Uuid,
        entity: EntityId,
        aim: Vec2,
        range: f32,
        command: &InputCommand,
        now: Timestamp,
    ) -> Option<HitResult> {
        let origin = self.sim.position_of(entity)?;
        let query = HitQuery::new(entity, origin, aim, range)?;
        let rewind = self
            .lag
            .resolve_hit(player_id, command.client_timestamp, now, &query)?;

        if let Some(hit) = rewind.hit {
            info!(
                player_id = %player_id,
                seq = command.sequence,
                target = hit.target,
                rewound_to = rewind.effective,
                "Hit registered"
            );
        }
        rewind.hit
    }

    /// Drop a player's entity and tell everyone
    fn remove_player(&mut self, player_id: Uuid, entity: Option<EntityId>, reason: CloseReason) {
        let slot = self.players.remove(&player_id);
        self.ready.retain(|id| *id != player_id);
        let entity = slot.map(|s| s.entity).or(entity);

        if let Some(entity) = entity {
            self.sim.despawn_player(player_id, entity);
        }

        let _ = self.outbound_tx.send(Outbound::Lifecycle(ServerMsg::PlayerLeft {
            player_id,
            entity_id: entity,
            reason: reason.as_str().to_string(),
        }));

        info!(
            player_id = %player_id,
            reason = reason.as_str(),
            player_count = self.players.len(),
            "Player left"
        );
    }
}
