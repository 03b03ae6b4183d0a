//! WebSocket upgrade handler
//!
//! Each connection gets a reader loop (socket -> tick loop) and a writer task
//! (tick loop -> socket). Neither ever blocks the tick loop.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::NetError;
use crate::game::{Inbound, Outbound};
use crate::input::InputRejection;
use crate::session::CloseReason;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::Timestamp;
use crate::ws::codec::{CodecError, WireCodec};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Per-connection queue for messages addressed to one player
const DIRECT_QUEUE_LEN: usize = 32;

/// How often the server probes RTT
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler. Player ids are assigned here.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let player_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, state: AppState) {
    let now = state.clock.now();
    let session_id = match state.sessions.open(player_id, now) {
        Ok(id) => id,
        Err(e) => {
            error!(player_id = %player_id, error = %e, "Failed to open session");
            return;
        }
    };
    info!(player_id = %player_id, session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: now,
        tick_rate_hz: state.config.tick_rate_hz,
        interp_delay_ms: state.config.interp_buffer_delay_ms,
    };
    if let Err(e) = send_msg(&mut ws_sink, &state, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        state.sessions.close(&player_id, CloseReason::Disconnected);
        return;
    }

    let (direct_tx, direct_rx) = mpsc::channel(DIRECT_QUEUE_LEN);
    let outbound_rx = state.server.subscribe();

    let writer_handle = tokio::spawn(run_writer(
        player_id,
        ws_sink,
        outbound_rx,
        direct_rx,
        state.clone(),
    ));

    run_reader(player_id, ws_stream, direct_tx, &state).await;

    // The tick loop despawns and closes the session
    if let Err(e) = state.server.submit_wait(Inbound::Leave { player_id }).await {
        warn!(player_id = %player_id, error = %e, "Could not signal leave");
        state.sessions.close(&player_id, CloseReason::Disconnected);
    }

    writer_handle.abort();
    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Tick loop -> socket
async fn run_writer(
    player_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
    state: AppState,
) {
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let mut last = false;
        let msg = tokio::select! {
            received = outbound_rx.recv() => match received {
                Ok(Outbound::Tick(tick)) => {
                    ServerMsg::StateUpdate(tick.state_update_for(player_id, state.visibility.as_ref()))
                }
                Ok(Outbound::Lifecycle(msg)) => {
                    // Our own removal (idle timeout) ends the connection
                    last = matches!(&msg, ServerMsg::PlayerLeft { player_id: id, .. } if *id == player_id);
                    msg
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Newer snapshots supersede the skipped ones
                    warn!(player_id = %player_id, lagged_count = n, "Client lagged, skipping snapshots");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(player_id = %player_id, "Outbound channel closed");
                    break;
                }
            },
            Some(msg) = direct_rx.recv() => msg,
            _ = ping.tick() => ServerMsg::Ping { server_t: state.clock.now() },
        };

        if let Err(e) = send_msg(&mut ws_sink, &state, &msg).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            break;
        }
        if last {
            let _ = ws_sink.send(Message::Close(None)).await;
            break;
        }
    }
}

/// Socket -> tick loop
async fn run_reader(
    player_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    direct_tx: mpsc::Sender<ServerMsg>,
    state: &AppState,
) {
    let mut conn = Connection::new(player_id, direct_tx, state);

    while let Some(result) = ws_stream.next().await {
        let decoded: Result<ClientMsg, CodecError> = match result {
            Ok(Message::Text(text)) => state.codec.decode_text(&text),
            Ok(Message::Binary(bytes)) => state.codec.decode(&bytes),
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            // Protocol-level ping/pong is answered by axum
            Ok(_) => continue,
            Err(e) => {
                debug!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        };

        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                conn.reply(ServerMsg::error("malformed", e.to_string()));
                continue;
            }
        };

        if conn.handle(state, msg).await == Flow::Close {
            break;
        }
    }
}

/// Whether the reader keeps going after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Per-connection reader state
pub(crate) struct Connection {
    player_id: Uuid,
    direct_tx: mpsc::Sender<ServerMsg>,
    rate_limiter: PlayerRateLimiter,
    tick_ms: u64,
    /// Buffer delay last advertised to this client
    last_hint: u64,
}

impl Connection {
    pub(crate) fn new(player_id: Uuid, direct_tx: mpsc::Sender<ServerMsg>, state: &AppState) -> Self {
        Self {
            player_id,
            direct_tx,
            rate_limiter: PlayerRateLimiter::new(state.config.input_rate_limit),
            tick_ms: state.config.tick_clock().tick_interval_ms(),
            last_hint: state.config.interp_buffer_delay_ms,
        }
    }

    /// Best-effort message to this client only
    fn reply(&self, msg: ServerMsg) {
        let _ = self.direct_tx.try_send(msg);
    }

    /// Act on one decoded client message
    pub(crate) async fn handle(&mut self, state: &AppState, msg: ClientMsg) -> Flow {
        let player_id = self.player_id;
        let now = state.clock.now();
        if state.sessions.touch(&player_id, now).is_err() {
            info!(player_id = %player_id, "Session closed, dropping connection");
            return Flow::Close;
        }

        let submitted = match msg {
            ClientMsg::Join => {
                state
                    .server
                    .submit_wait(Inbound::Join {
                        player_id,
                        reply: self.direct_tx.clone(),
                    })
                    .await
            }
            ClientMsg::Input(command) => {
                if !self.rate_limiter.check_input() {
                    warn!(player_id = %player_id, seq = command.sequence, "Rate limited input message");
                    return Flow::Continue;
                }
                let checked = if command.player_id != player_id {
                    Err(InputRejection::WrongPlayer)
                } else {
                    command.validate()
                };
                match checked {
                    Ok(()) => state.server.submit(Inbound::Input(command)),
                    Err(reason) => {
                        let e = NetError::InputRejected { player_id, reason };
                        warn!(seq = command.sequence, error = %e, "Invalid input");
                        self.reply(ServerMsg::error("input_rejected", reason.to_string()));
                        return Flow::Continue;
                    }
                }
            }
            ClientMsg::Ping { t } => {
                self.reply(ServerMsg::Pong { t, server_time: now });
                return Flow::Continue;
            }
            ClientMsg::Pong { server_t } => {
                self.on_pong(state, server_t, now);
                return Flow::Continue;
            }
            ClientMsg::Leave => return Flow::Close,
        };

        match submitted {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!(player_id = %player_id, error = %e, "Tick loop unavailable");
                Flow::Close
            }
        }
    }

    /// Fold an RTT sample in and re-advertise the buffer delay if it moved
    fn on_pong(&mut self, state: &AppState, server_t: Timestamp, now: Timestamp) {
        if server_t > now {
            return;
        }
        let sample = (now - server_t) as f64;
        let Some(rtt) = state.sessions.record_rtt_sample(&self.player_id, sample) else {
            return;
        };
        let hint = rtt.buffer_delay_hint(state.config.interp_buffer_delay_ms, self.tick_ms);
        if hint != self.last_hint {
            debug!(player_id = %self.player_id, interp_delay_ms = hint, "Buffer delay hint changed");
            self.last_hint = hint;
            self.reply(ServerMsg::BufferDelay { interp_delay_ms: hint });
        }
    }
}

/// Encode and send one message
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
    msg: &ServerMsg,
) -> Result<(), NetError> {
    let text = state.codec.encode_text(msg)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| NetError::Transport(e.to_string()))
}
