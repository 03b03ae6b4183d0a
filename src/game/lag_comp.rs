//! Server-side rewind for hit detection
//!
//! A hit is resolved against the world as the attacker saw it, reconstructed
//! from the snapshot history at the attacker's reported observation time.
//! That time is untrusted and is always clamped to
//! `[now - max_window, now]` first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::NetError;
use crate::snapshot::{EntityId, EntitySnapshot, SnapshotStore, WorldSnapshot};
use crate::util::time::Timestamp;

use super::combat::{raycast, HitQuery, HitResult};

/// How the rewound state is reconstructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewindMode {
    /// Latest snapshot at or before the observation time
    #[default]
    AtOrBefore,
    /// Blend the bracketing snapshots for sub-tick precision
    Interpolated,
}

/// Where the rewound state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindSource {
    Snapshot { timestamp: Timestamp },
    Blended { before: Timestamp, after: Timestamp },
    /// History did not reach back far enough; oldest entry used instead
    ClampedToOldest { timestamp: Timestamp },
}

/// Outcome of a lag-compensated hit query
#[derive(Debug, Clone, PartialEq)]
pub struct Rewind {
    /// Timestamp the attacker claimed
    pub requested: Timestamp,
    /// Timestamp after clamping to the compensation window
    pub effective: Timestamp,
    pub source: RewindSource,
    pub hit: Option<HitResult>,
}

pub struct LagCompensator {
    store: Arc<SnapshotStore>,
    max_window_ms: u64,
    mode: RewindMode,
}

impl LagCompensator {
    pub fn new(store: Arc<SnapshotStore>, max_window: Duration, mode: RewindMode) -> Self {
        Self {
            store,
            max_window_ms: max_window.as_millis() as u64,
            mode,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn mode(&self) -> RewindMode {
        self.mode
    }

    /// Feed the history with the snapshot the server just broadcast
    pub fn record_snapshot(&self, snapshot: impl Into<Arc<WorldSnapshot>>) -> Result<(), NetError> {
        self.store.add(snapshot)
    }

    /// Restrict an attacker-reported time to `[now - max_window, now]`
    pub fn clamp_timestamp(&self, claimed: Timestamp, now: Timestamp) -> Timestamp {
        claimed.clamp(now.saturating_sub(self.max_window_ms), now)
    }

    /// Reconstruct entity state at `effective`; `None` only with no history
    pub fn rewind(&self, effective: Timestamp) -> Option<(HashMap<EntityId, EntitySnapshot>, RewindSource)> {
        let view = self.store.view();

        if self.mode == RewindMode::Interpolated {
            if let Some(bracket) = view.lookup(effective) {
                let source = if Arc::ptr_eq(&bracket.before, &bracket.after) {
                    RewindSource::Snapshot {
                        timestamp: bracket.before.timestamp,
                    }
                } else {
                    RewindSource::Blended {
                        before: bracket.before.timestamp,
                        after: bracket.after.timestamp,
                    }
                };
                return Some((bracket.reconstruct_existing(), source));
            }
        }

        let found = view.lookup_clamped(effective)?;
        let source = if found.clamped {
            RewindSource::ClampedToOldest {
                timestamp: found.snapshot.timestamp,
            }
        } else {
            RewindSource::Snapshot {
                timestamp: found.snapshot.timestamp,
            }
        };
        Some((found.snapshot.entities.clone(), source))
    }

    /// Resolve `query` against the world as `attacker` saw it at
    /// `client_observed`. `None` when there is no history to rewind into.
    pub fn resolve_hit(
        &self,
        attacker: Uuid,
        client_observed: Timestamp,
        now: Timestamp,
        query: &HitQuery,
    ) -> Option<Rewind> {
        let effective = self.clamp_timestamp(client_observed, now);
        if effective != client_observed {
            if client_observed > now {
                warn!(
                    player_id = %attacker,
                    claimed = client_observed,
                    now,
                    "Attacker claimed a future observation time"
                );
            } else {
                debug!(
                    player_id = %attacker,
                    claimed = client_observed,
                    effective,
                    "Clamped observation time to compensation window"
                );
            }
        }

        let Some((entities, source)) = self.rewind(effective) else {
            warn!(player_id = %attacker, effective, "No snapshot history, cannot resolve hit");
            return None;
        };

        if let RewindSource::ClampedToOldest { timestamp } = source {
            warn!(
                player_id = %attacker,
                effective,
                oldest = timestamp,
                "History does not reach observation time, resolving against oldest snapshot"
            );
        }

        let hit = raycast(query, entities.values());
        Some(Rewind {
            requested: client_observed,
            effective,
            source,
            hit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Vec2;

    /// Target entity 7 crosses the x axis moving up 10 units per 50ms
    fn history(mode: RewindMode) -> LagCompensator {
        let store = Arc::new(SnapshotStore::new(32));
        let comp = LagCompensator::new(store, Duration::from_secs(5), mode);
        for i in 0..5u64 {
            let ts = i * 50;
            let y = -20.0 + 10.0 * i as f32;
            let snapshot = WorldSnapshot::new(ts, i).with_entity(
                EntitySnapshot::new(7, Vec2::new(100.0, y), Vec2::new(0.0, 200.0)).with_radius(4.0),
            );
            comp.record_snapshot(snapshot).unwrap();
        }
        comp
    }

    fn shot() -> HitQuery {
        HitQuery::new(1, Vec2::ZERO, Vec2::new(1.0, 0.0), 500.0).unwrap()
    }

    #[test]
    fn clamp_bounds_both_sides() {
        let comp = history(RewindMode::AtOrBefore);
        let now = 10_000;
        assert_eq!(comp.clamp_timestamp(0, now), 5_000);
        assert_eq!(comp.clamp_timestamp(20_000, now), now);
        assert_eq!(comp.clamp_timestamp(7_000, now), 7_000);
        assert_eq!(comp.clamp_timestamp(0, 100), 0);
    }

    #[test]
    fn hit_uses_rewound_not_present_state() {
        let comp = history(RewindMode::AtOrBefore);
        // At t=100 the target sits on the ray (y = 0); at t=200 it is at y = 20
        let rewind = comp.resolve_hit(Uuid::nil(), 120, 200, &shot()).unwrap();
        assert_eq!(rewind.source, RewindSource::Snapshot { timestamp: 100 });
        assert_eq!(rewind.hit.map(|h| h.target), Some(7));

        let present = comp.resolve_hit(Uuid::nil(), 200, 200, &shot()).unwrap();
        assert!(present.hit.is_none());
    }

    #[test]
    fn interpolated_mode_blends_bracket() {
        let comp = history(RewindMode::Interpolated);
        let rewind = comp.resolve_hit(Uuid::nil(), 110, 200, &shot()).unwrap();
        assert_eq!(rewind.source, RewindSource::Blended { before: 100, after: 150 });
        assert!(rewind.hit.is_some());
    }

    #[test]
    fn interpolated_rewind_ignores_later_spawns() {
        let store = Arc::new(SnapshotStore::new(8));
        let comp = LagCompensator::new(store, Duration::from_secs(5), RewindMode::Interpolated);
        let bystander = EntitySnapshot::new(3, Vec2::new(100.0, 50.0), Vec2::ZERO).with_radius(4.0);
        let spawned = EntitySnapshot::new(7, Vec2::new(100.0, 0.0), Vec2::ZERO).with_radius(4.0);
        comp.record_snapshot(WorldSnapshot::new(100, 2).with_entity(bystander)).unwrap();
        comp.record_snapshot(WorldSnapshot::new(150, 3).with_entity(bystander).with_entity(spawned))
            .unwrap();

        let rewind = comp.resolve_hit(Uuid::nil(), 110, 150, &shot()).unwrap();
        assert_eq!(rewind.source, RewindSource::Blended { before: 100, after: 150 });
        assert!(rewind.hit.is_none());

        let (entities, _) = comp.rewind(110).unwrap();
        assert!(entities.contains_key(&3));
        assert!(!entities.contains_key(&7));

        // Once it exists the same shot lands
        let rewind = comp.resolve_hit(Uuid::nil(), 150, 150, &shot()).unwrap();
        assert_eq!(rewind.hit.map(|h| h.target), Some(7));
    }

    #[test]
    fn empty_history_yields_none() {
        let comp = LagCompensator::new(
            Arc::new(SnapshotStore::new(4)),
            Duration::from_secs(1),
            RewindMode::AtOrBefore,
        );
        assert!(comp.resolve_hit(Uuid::nil(), 0, 0, &shot()).is_none());
    }

    #[test]
    fn predating_history_clamps_to_oldest() {
        let store = Arc::new(SnapshotStore::new(4));
        let comp = LagCompensator::new(store, Duration::from_secs(5), RewindMode::AtOrBefore);
        comp.record_snapshot(WorldSnapshot::new(1_000, 20)).unwrap();
        let rewind = comp.resolve_hit(Uuid::nil(), 500, 1_200, &shot()).unwrap();
        assert_eq!(rewind.source, RewindSource::ClampedToOldest { timestamp: 1_000 });
    }
}
