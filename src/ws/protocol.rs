//! Wire message definitions
//! These are the semantic messages exchanged between client and server. The
//! byte encoding is chosen by a [`WireCodec`](super::codec::WireCodec).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::input::InputCommand;
use crate::snapshot::{EntityId, EntitySnapshot};
use crate::util::time::Timestamp;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the simulation (PlayerJoin)
    Join,

    /// Sequence-numbered input
    Input(InputCommand),

    /// Clock sync request
    Ping {
        /// Client local timestamp, echoed back
        t: u64,
    },

    /// Reply to a server ping, used for the server-side RTT estimate
    Pong {
        /// Server timestamp from the ping
        server_t: Timestamp,
    },

    /// Leave the simulation (PlayerLeave)
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once on connect
    Welcome {
        player_id: Uuid,
        server_time: Timestamp,
        tick_rate_hz: u32,
        /// Suggested interpolation delay
        interp_delay_ms: u64,
    },

    /// Confirmation that the receiver's entity exists
    Joined {
        entity_id: EntityId,
        tick: u64,
    },

    /// Another player entered the simulation
    PlayerJoined {
        player_id: Uuid,
        entity_id: EntityId,
    },

    /// A player left the simulation
    PlayerLeft {
        player_id: Uuid,
        entity_id: Option<EntityId>,
        reason: String,
    },

    /// Authoritative world state for one tick
    StateUpdate(StateUpdate),

    /// Server-initiated RTT probe
    Ping {
        server_t: Timestamp,
    },

    /// Reply to a client ping
    Pong {
        /// Echo of the client timestamp
        t: u64,
        server_time: Timestamp,
    },

    /// Interpolation delay suggestion after the RTT estimate changes
    BufferDelay {
        interp_delay_ms: u64,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },
}

/// Snapshot of the entities visible to one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub timestamp: Timestamp,
    pub tick: u64,
    /// Full entity list (no delta encoding)
    pub entities: Vec<EntitySnapshot>,
    /// Recipient's entry of the per-player last-processed-sequence table
    pub last_processed_seq: Option<u32>,
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
