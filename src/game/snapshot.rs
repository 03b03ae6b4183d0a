//! Snapshot building and per-recipient state updates

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::snapshot::{EntityId, EntitySnapshot, WorldSnapshot};
use crate::util::time::Timestamp;
use crate::ws::protocol::StateUpdate;

use super::world::Simulation;

/// Which entities a recipient may see.
///
/// Interest management is an external policy; the core only applies it.
pub trait VisibilityFilter: Send + Sync + 'static {
    fn is_visible(&self, recipient: Uuid, recipient_entity: Option<EntityId>, entity: &EntitySnapshot) -> bool;
}

/// Everyone sees everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllVisible;

impl VisibilityFilter for AllVisible {
    fn is_visible(&self, _: Uuid, _: Option<EntityId>, _: &EntitySnapshot) -> bool {
        true
    }
}

/// What the tick loop hands to broadcaster tasks after each tick
#[derive(Debug, Clone)]
pub struct TickBroadcast {
    pub snapshot: Arc<WorldSnapshot>,
    /// Last processed input sequence per player
    pub acks: Arc<HashMap<Uuid, u32>>,
    /// Entity owned by each player
    pub owners: Arc<HashMap<Uuid, EntityId>>,
}

impl TickBroadcast {
    /// Filter and package this tick for one recipient
    pub fn state_update_for(&self, recipient: Uuid, filter: &dyn VisibilityFilter) -> StateUpdate {
        let own_entity = self.owners.get(&recipient).copied();
        let mut entities: Vec<EntitySnapshot> = self
            .snapshot
            .entities
            .values()
            .filter(|e| Some(e.entity_id) == own_entity || filter.is_visible(recipient, own_entity, e))
            .copied()
            .collect();
        entities.sort_by_key(|e| e.entity_id);

        StateUpdate {
            timestamp: self.snapshot.timestamp,
            tick: self.snapshot.tick,
            entities,
            last_processed_seq: self.acks.get(&recipient).copied(),
        }
    }
}

/// Builds one authoritative snapshot per tick
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    total_snapshots: u64,
    avg_entities_per_snapshot: f32,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build<S: Simulation + ?Sized>(&mut self, sim: &S, tick: u64, timestamp: Timestamp) -> WorldSnapshot {
        let snapshot = WorldSnapshot::from_entities(timestamp, tick, sim.entities());

        // Running average
        self.total_snapshots += 1;
        let n = self.total_snapshots as f32;
        self.avg_entities_per_snapshot =
            self.avg_entities_per_snapshot * ((n - 1.0) / n) + (snapshot.entities.len() as f32 / n);

        snapshot
    }

    pub fn total_snapshots(&self) -> u64 {
        self.total_snapshots
    }

    pub fn avg_entities_per_snapshot(&self) -> f32 {
        self.avg_entities_per_snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::KinematicModel;
    use crate::game::world::KinematicWorld;
    use crate::snapshot::Vec2;

    struct OnlyOwnAndEven;

    impl VisibilityFilter for OnlyOwnAndEven {
        fn is_visible(&self, _: Uuid, _: Option<EntityId>, entity: &EntitySnapshot) -> bool {
            entity.entity_id % 2 == 0
        }
    }

    fn broadcast(recipient: Uuid) -> TickBroadcast {
        let snapshot = WorldSnapshot::from_entities(
            100,
            2,
            (1..=4).map(|id| EntitySnapshot::new(id, Vec2::new(id as f32, 0.0), Vec2::ZERO)),
        );
        TickBroadcast {
            snapshot: Arc::new(snapshot),
            acks: Arc::new(HashMap::from([(recipient, 9)])),
            owners: Arc::new(HashMap::from([(recipient, 3)])),
        }
    }

    #[test]
    fn filter_applies_but_own_entity_always_included() {
        let me = Uuid::new_v4();
        let update = broadcast(me).state_update_for(me, &OnlyOwnAndEven);
        let ids: Vec<_> = update.entities.iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(update.last_processed_seq, Some(9));
    }

    #[test]
    fn other_recipients_get_no_ack() {
        let me = Uuid::new_v4();
        let update = broadcast(me).state_update_for(Uuid::new_v4(), &AllVisible);
        assert_eq!(update.entities.len(), 4);
        assert_eq!(update.last_processed_seq, None);
    }

    #[test]
    fn builder_tracks_average() {
        let mut world = KinematicWorld::new(KinematicModel::default(), 16.0, 9);
        world.spawn_player(Uuid::new_v4());
        world.spawn_player(Uuid::new_v4());
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(&world, 1, 50);
        assert_eq!(snap.entities.len(), 2);
        assert_eq!(snap.timestamp, 50);
        assert_eq!(builder.total_snapshots(), 1);
        assert_eq!(builder.avg_entities_per_snapshot(), 2.0);
    }
}
