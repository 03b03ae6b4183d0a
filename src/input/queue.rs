//! Per-player inbound command ordering
//!
//! Receiver tasks may deliver a player's commands late, twice, or out of
//! order. The queue holds them until the next tick and hands them back in
//! sequence order, never below the last applied sequence.

use std::collections::BTreeMap;

use super::{InputCommand, InputRejection};

#[derive(Debug)]
pub struct PlayerInputQueue {
    last_applied: u32,
    pending: BTreeMap<u32, InputCommand>,
    max_pending: usize,
}

impl PlayerInputQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            last_applied: 0,
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Highest sequence handed out by [`drain_ordered`](Self::drain_ordered)
    pub fn last_applied(&self) -> u32 {
        self.last_applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue a command for the next tick.
    ///
    /// Gaps are fine; replays and duplicates are not.
    pub fn push(&mut self, command: InputCommand) -> Result<(), InputRejection> {
        let seq = command.sequence;
        if seq <= self.last_applied {
            return Err(InputRejection::Stale {
                seq,
                last_applied: self.last_applied,
            });
        }
        if self.pending.contains_key(&seq) {
            return Err(InputRejection::Duplicate(seq));
        }
        if self.pending.len() >= self.max_pending {
            return Err(InputRejection::QueueFull);
        }
        self.pending.insert(seq, command);
        Ok(())
    }

    /// Take every queued command in ascending sequence order and mark the
    /// highest one applied.
    pub fn drain_ordered(&mut self) -> Vec<InputCommand> {
        let drained: Vec<InputCommand> = std::mem::take(&mut self.pending).into_values().collect();
        if let Some(last) = drained.last() {
            self.last_applied = last.sequence;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputKind;
    use crate::snapshot::Vec2;
    use uuid::Uuid;

    fn cmd(seq: u32) -> InputCommand {
        InputCommand {
            player_id: Uuid::nil(),
            sequence: seq,
            kind: InputKind::Move { direction: Vec2::new(1.0, 0.0) },
            client_timestamp: 0,
        }
    }

    #[test]
    fn reorders_within_a_tick() {
        let mut queue = PlayerInputQueue::new(8);
        for seq in [3, 1, 2] {
            queue.push(cmd(seq)).unwrap();
        }
        let seqs: Vec<_> = queue.drain_ordered().iter().map(|c| c.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(queue.last_applied(), 3);
    }

    #[test]
    fn late_and_duplicate_commands_are_dropped() {
        let mut queue = PlayerInputQueue::new(8);
        queue.push(cmd(5)).unwrap();
        assert_eq!(queue.push(cmd(5)), Err(InputRejection::Duplicate(5)));
        queue.drain_ordered();
        assert_eq!(
            queue.push(cmd(4)),
            Err(InputRejection::Stale { seq: 4, last_applied: 5 })
        );
        assert_eq!(
            queue.push(cmd(5)),
            Err(InputRejection::Stale { seq: 5, last_applied: 5 })
        );
    }

    #[test]
    fn gaps_are_tolerated() {
        let mut queue = PlayerInputQueue::new(8);
        queue.push(cmd(2)).unwrap();
        queue.drain_ordered();
        queue.push(cmd(9)).unwrap();
        assert_eq!(queue.drain_ordered().len(), 1);
        assert_eq!(queue.last_applied(), 9);
    }

    #[test]
    fn pending_is_bounded() {
        let mut queue = PlayerInputQueue::new(2);
        queue.push(cmd(1)).unwrap();
        queue.push(cmd(2)).unwrap();
        assert_eq!(queue.push(cmd(3)), Err(InputRejection::QueueFull));
        assert!(queue.drain_ordered().len() == 2);
        assert!(queue.push(cmd(3)).is_ok());
    }
}
