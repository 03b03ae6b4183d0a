//! Remote entity interpolation
//!
//! Remote entities are drawn `buffer_delay` in the past, between the two
//! buffered snapshots that enclose the render time. Never extrapolates: past
//! either end of the buffer the nearest snapshot is shown as-is.
//!
//! Retention is by time: the buffer always reaches back at least
//! `buffer_delay + 2 ticks` behind its newest snapshot, whatever the count.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::snapshot::store::bracket;
use crate::snapshot::{EntityId, EntitySnapshot, Vec2, WorldSnapshot};
use crate::util::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatedState {
    pub entity_id: EntityId,
    pub position: Vec2,
    pub velocity: Vec2,
}

impl From<&EntitySnapshot> for InterpolatedState {
    fn from(e: &EntitySnapshot) -> Self {
        Self {
            entity_id: e.entity_id,
            position: e.position,
            velocity: e.velocity,
        }
    }
}

/// Snapshot spacing assumed until the tick rate is known
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

/// Hard ceiling on buffered snapshots, whatever the delay
const MAX_BUFFERED: usize = 512;

pub struct Interpolator {
    buffer: Vec<Arc<WorldSnapshot>>,
    /// Snapshots kept even when older than the retention window
    min_len: usize,
    buffer_delay_ms: u64,
    tick_interval_ms: u64,
    /// Locally predicted entity, never interpolated
    local_entity: Option<EntityId>,
}

impl Interpolator {
    pub fn new(min_len: usize, buffer_delay_ms: u64) -> Self {
        Self {
            buffer: Vec::new(),
            min_len: min_len.clamp(2, MAX_BUFFERED),
            buffer_delay_ms,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            local_entity: None,
        }
    }

    pub fn set_local_entity(&mut self, entity: Option<EntityId>) {
        self.local_entity = entity;
    }

    pub fn buffer_delay_ms(&self) -> u64 {
        self.buffer_delay_ms
    }

    pub fn set_buffer_delay(&mut self, ms: u64) {
        self.buffer_delay_ms = ms;
    }

    pub fn set_tick_interval(&mut self, ms: u64) {
        self.tick_interval_ms = ms;
    }

    /// How far behind the newest snapshot the buffer reaches
    pub fn retention_ms(&self) -> u64 {
        self.buffer_delay_ms + 2 * self.tick_interval_ms
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.buffer.last().map(|s| s.timestamp)
    }

    /// Buffer a snapshot in timestamp order. Returns false for duplicates and
    /// for snapshots the retention window would drop straight away.
    pub fn ingest(&mut self, snapshot: impl Into<Arc<WorldSnapshot>>) -> bool {
        let snapshot = snapshot.into();
        let pos = self.buffer.partition_point(|s| s.timestamp < snapshot.timestamp);

        if self.buffer.get(pos).is_some_and(|s| s.timestamp == snapshot.timestamp) {
            trace!(timestamp = snapshot.timestamp, "Duplicate snapshot ignored");
            return false;
        }
        if pos == 0 && self.is_full() {
            trace!(timestamp = snapshot.timestamp, "Snapshot older than buffer ignored");
            return false;
        }

        self.buffer.insert(pos, snapshot);
        self.evict();
        true
    }

    /// Oldest entry already reaches the retention boundary
    fn is_full(&self) -> bool {
        let (Some(oldest), Some(newest)) = (self.buffer.first(), self.buffer.last()) else {
            return false;
        };
        if self.buffer.len() >= MAX_BUFFERED {
            return true;
        }
        self.buffer.len() >= self.min_len
            && oldest.timestamp <= newest.timestamp.saturating_sub(self.retention_ms())
    }

    fn evict(&mut self) {
        let Some(newest) = self.newest_timestamp() else {
            return;
        };
        let keep_from = newest.saturating_sub(self.retention_ms());
        // The last snapshot at or before keep_from stays so that render times
        // inside the window are still bracketed
        let expired = self
            .buffer
            .partition_point(|s| s.timestamp <= keep_from)
            .saturating_sub(1);
        let surplus = self.buffer.len().saturating_sub(self.min_len);
        let overflow = self.buffer.len().saturating_sub(MAX_BUFFERED);
        let drop = expired.min(surplus).max(overflow);
        if drop > 0 {
            self.buffer.drain(..drop);
        }
    }

    /// Remote entities at `now - buffer_delay`
    pub fn sample(&self, now: Timestamp) -> HashMap<EntityId, InterpolatedState> {
        self.sample_at(now.saturating_sub(self.buffer_delay_ms))
    }

    /// Remote entities at `render_time`
    pub fn sample_at(&self, render_time: Timestamp) -> HashMap<EntityId, InterpolatedState> {
        let (Some(oldest), Some(newest)) = (self.buffer.first(), self.buffer.last()) else {
            return HashMap::new();
        };

        if render_time <= oldest.timestamp {
            return self.verbatim(oldest);
        }
        if render_time >= newest.timestamp {
            return self.verbatim(newest);
        }

        match bracket(&self.buffer, render_time) {
            Some(b) => b
                .reconstruct()
                .into_iter()
                .filter(|(id, _)| Some(*id) != self.local_entity)
                .map(|(id, e)| (id, InterpolatedState::from(&e)))
                .collect(),
            None => self.verbatim(newest),
        }
    }

    fn verbatim(&self, snapshot: &WorldSnapshot) -> HashMap<EntityId, InterpolatedState> {
        snapshot
            .entities
            .iter()
            .filter(|(id, _)| Some(**id) != self.local_entity)
            .map(|(id, e)| (*id, InterpolatedState::from(e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ts: Timestamp, entities: &[(EntityId, f32)]) -> WorldSnapshot {
        WorldSnapshot::from_entities(
            ts,
            ts / 50,
            entities
                .iter()
                .map(|(id, x)| EntitySnapshot::new(*id, Vec2::new(*x, 0.0), Vec2::ZERO)),
        )
    }

    #[test]
    fn empty_buffer_renders_nothing() {
        let interp = Interpolator::new(8, 100);
        assert!(interp.sample(1_000).is_empty());
    }

    #[test]
    fn single_snapshot_is_rendered_verbatim() {
        let mut interp = Interpolator::new(8, 100);
        interp.ingest(snap(100, &[(1, 5.0)]));
        assert_eq!(interp.sample_at(40)[&1].position, Vec2::new(5.0, 0.0));
        assert_eq!(interp.sample_at(900)[&1].position, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let mut interp = Interpolator::new(8, 0);
        assert!(interp.ingest(snap(200, &[(1, 20.0)])));
        assert!(interp.ingest(snap(100, &[(1, 10.0)])));
        assert!(!interp.ingest(snap(100, &[(1, 99.0)])));
        assert_eq!(interp.len(), 2);
        assert_eq!(interp.sample_at(150)[&1].position, Vec2::new(15.0, 0.0));
    }

    #[test]
    fn full_buffer_evicts_oldest_and_refuses_stale() {
        // Two ticks of slack at 50ms: keeps everything back to newest - 100
        let mut interp = Interpolator::new(2, 0);
        for ts in [100, 150, 200, 250] {
            interp.ingest(snap(ts, &[]));
        }
        assert_eq!(interp.len(), 3);
        assert!(!interp.ingest(snap(50, &[])));
        assert_eq!(interp.newest_timestamp(), Some(250));
    }

    #[test]
    fn retention_follows_buffer_delay() {
        let mut interp = Interpolator::new(8, 500);
        for ts in (0..=2_000).step_by(50) {
            interp.ingest(snap(ts, &[(1, ts as f32)]));
        }
        // 500ms delay plus two ticks, more than the minimum of eight
        assert_eq!(interp.len(), 13);
        assert_eq!(interp.sample(2_025)[&1].position, Vec2::new(1_525.0, 0.0));

        // Shrinking the delay lets the next arrival trim the surplus
        interp.set_buffer_delay(100);
        interp.ingest(snap(2_050, &[(1, 2_050.0)]));
        assert_eq!(interp.len(), 8);
    }

    #[test]
    fn spawn_snaps_and_despawn_disappears() {
        let mut interp = Interpolator::new(8, 0);
        interp.ingest(snap(100, &[(1, 0.0), (2, 0.0)]));
        interp.ingest(snap(200, &[(1, 10.0), (3, 7.0)]));
        let frame = interp.sample_at(150);
        assert!(!frame.contains_key(&2));
        assert_eq!(frame[&3].position, Vec2::new(7.0, 0.0));
        assert_eq!(frame[&1].position, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn local_entity_is_excluded() {
        let mut interp = Interpolator::new(8, 0);
        interp.set_local_entity(Some(1));
        interp.ingest(snap(100, &[(1, 0.0), (2, 0.0)]));
        interp.ingest(snap(200, &[(1, 10.0), (2, 10.0)]));
        for t in [50, 150, 250] {
            let frame = interp.sample_at(t);
            assert!(!frame.contains_key(&1));
            assert!(frame.contains_key(&2));
        }
    }
}
