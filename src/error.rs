//! Error types shared across the netcode core

use uuid::Uuid;

use crate::input::InputRejection;
use crate::util::time::Timestamp;

/// Errors surfaced by the netcode core.
///
/// Everything transient (loss, reordering, warmup misses) is resolved locally
/// and never reaches this type; what remains are protocol violations and
/// session lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Snapshot at {got} is older than newest stored snapshot at {newest}")]
    NonMonotonicSnapshot { newest: Timestamp, got: Timestamp },

    #[error("Input from {player_id} rejected: {reason}")]
    InputRejected {
        player_id: Uuid,
        reason: InputRejection,
    },

    #[error("No open session for player {0}")]
    UnknownSession(Uuid),

    #[error("Session already open for player {0}")]
    DuplicateSession(Uuid),

    #[error("Server tick loop is not running")]
    ServerUnavailable,

    #[error("Tick loop inbound queue is full")]
    InboundQueueFull,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(#[from] crate::ws::codec::CodecError),
}
