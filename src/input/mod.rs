//! Sequence-numbered player input commands

pub mod queue;

pub use queue::PlayerInputQueue;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::Vec2;
use crate::util::time::Timestamp;

/// Highest inventory slot a `UseItem` command may reference
pub const MAX_ITEM_SLOTS: u8 = 16;

/// Longest attack range a client may request
pub const MAX_ATTACK_RANGE: f32 = 2_000.0;

/// Tolerance on the unit-length bound of a move vector
const MOVE_EPSILON: f32 = 1e-3;

/// Player intent carried by an [`InputCommand`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputKind {
    /// Movement intent; each axis in `[-1, 1]`, length at most 1
    Move { direction: Vec2 },
    /// Hitscan attack along `aim` up to `range`
    Attack { aim: Vec2, range: f32 },
    /// Use the item in an inventory slot
    UseItem { slot: u8 },
}

impl InputKind {
    /// Reject payloads no honest client can produce
    pub fn validate(&self) -> Result<(), InputRejection> {
        match *self {
            InputKind::Move { direction } => {
                if !direction.is_finite() {
                    return Err(InputRejection::NonFinite);
                }
                if direction.length() > 1.0 + MOVE_EPSILON {
                    return Err(InputRejection::OutOfRange("move direction longer than 1"));
                }
            }
            InputKind::Attack { aim, range } => {
                if !aim.is_finite() || !range.is_finite() {
                    return Err(InputRejection::NonFinite);
                }
                if aim.normalized().is_none() {
                    return Err(InputRejection::OutOfRange("zero aim vector"));
                }
                if range <= 0.0 || range > MAX_ATTACK_RANGE {
                    return Err(InputRejection::OutOfRange("attack range"));
                }
            }
            InputKind::UseItem { slot } => {
                if slot >= MAX_ITEM_SLOTS {
                    return Err(InputRejection::OutOfRange("item slot"));
                }
            }
        }
        Ok(())
    }
}

/// One player input, stamped client-side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub player_id: Uuid,
    /// Per-player, strictly increasing, starting at 1
    pub sequence: u32,
    pub kind: InputKind,
    /// Server-time instant the client was rendering when it produced this
    pub client_timestamp: Timestamp,
}

impl InputCommand {
    pub fn validate(&self) -> Result<(), InputRejection> {
        if self.sequence == 0 {
            return Err(InputRejection::ZeroSequence);
        }
        self.kind.validate()
    }
}

/// Why a command was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputRejection {
    #[error("sequence {seq} already applied (last applied {last_applied})")]
    Stale { seq: u32, last_applied: u32 },

    #[error("sequence {0} already queued")]
    Duplicate(u32),

    #[error("pending queue full")]
    QueueFull,

    #[error("sequence numbers start at 1")]
    ZeroSequence,

    #[error("non-finite value in payload")]
    NonFinite,

    #[error("value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("command claims another player's identity")]
    WrongPlayer,

    #[error("player has no entity in the simulation")]
    UnknownPlayer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_must_be_unit_bounded_and_finite() {
        assert!(InputKind::Move { direction: Vec2::new(1.0, 0.0) }.validate().is_ok());
        assert!(InputKind::Move { direction: Vec2::new(0.7071, 0.7071) }.validate().is_ok());
        assert_eq!(
            InputKind::Move { direction: Vec2::new(f32::NAN, 0.0) }.validate(),
            Err(InputRejection::NonFinite)
        );
        assert!(matches!(
            InputKind::Move { direction: Vec2::new(3.0, 0.0) }.validate(),
            Err(InputRejection::OutOfRange(_))
        ));
    }

    #[test]
    fn attack_needs_direction_and_sane_range() {
        let ok = InputKind::Attack { aim: Vec2::new(0.0, 2.0), range: 300.0 };
        assert!(ok.validate().is_ok());
        let zero = InputKind::Attack { aim: Vec2::ZERO, range: 300.0 };
        assert!(zero.validate().is_err());
        let far = InputKind::Attack { aim: Vec2::new(1.0, 0.0), range: 1e9 };
        assert!(far.validate().is_err());
    }

    #[test]
    fn wire_shape_is_tagged() {
        let cmd = InputCommand {
            player_id: Uuid::nil(),
            sequence: 4,
            kind: InputKind::UseItem { slot: 2 },
            client_timestamp: 1234,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["kind"]["type"], "use_item");
        assert_eq!(json["kind"]["slot"], 2);
        let unknown = r#"{"player_id":"00000000-0000-0000-0000-000000000000","sequence":1,"kind":{"type":"teleport"},"client_timestamp":0}"#;
        assert!(serde_json::from_str::<InputCommand>(unknown).is_err());
    }

    #[test]
    fn zero_sequence_rejected() {
        let cmd = InputCommand {
            player_id: Uuid::nil(),
            sequence: 0,
            kind: InputKind::UseItem { slot: 0 },
            client_timestamp: 0,
        };
        assert_eq!(cmd.validate(), Err(InputRejection::ZeroSequence));
    }
}
