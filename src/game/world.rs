//! The authoritative simulation seam
//!
//! Gameplay lives outside the netcode core. The tick loop only needs to
//! spawn/despawn player entities, hand over validated commands and landed
//! hits, advance time, and read entity state back out.

use std::collections::{BTreeMap, HashMap};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::input::{InputCommand, InputKind};
use crate::snapshot::{EntityId, EntitySnapshot, Vec2};

use super::combat::{apply_damage, HitResult, ATTACK_DAMAGE};
use super::physics::{InputModel, KinematicModel, MotionState};

pub trait Simulation: Send + 'static {
    /// Create the entity a newly joined player controls
    fn spawn_player(&mut self, player_id: Uuid) -> EntityId;

    /// Remove a departed player's entity
    fn despawn_player(&mut self, player_id: Uuid, entity: EntityId);

    /// Apply one validated, in-order command
    fn apply_input(&mut self, entity: EntityId, command: &InputCommand);

    /// Apply a hit resolved by lag compensation
    fn apply_hit(&mut self, hit: &HitResult);

    /// Advance one tick
    fn step(&mut self, dt: f32);

    /// Current position of an entity, for building hit queries
    fn position_of(&self, entity: EntityId) -> Option<Vec2>;

    /// Current state of every entity
    fn entities(&self) -> Vec<EntitySnapshot>;
}

#[derive(Debug, Clone)]
struct Body {
    owner: Uuid,
    motion: MotionState,
    health: f32,
    deaths: u32,
}

/// Reference simulation: kinematic movement, hitscan damage, random respawn.
///
/// All randomness comes from a per-world seeded RNG so two worlds with the
/// same seed and inputs evolve identically.
pub struct KinematicWorld {
    model: KinematicModel,
    radius: f32,
    max_health: f32,
    rng: ChaCha8Rng,
    next_entity: EntityId,
    // BTreeMap keeps `entities()` ordering stable
    bodies: BTreeMap<EntityId, Body>,
    by_player: HashMap<Uuid, EntityId>,
}

impl KinematicWorld {
    pub fn new(model: KinematicModel, radius: f32, seed: u64) -> Self {
        Self {
            model,
            radius,
            max_health: 100.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_entity: 1,
            bodies: BTreeMap::new(),
            by_player: HashMap::new(),
        }
    }

    pub fn model(&self) -> &KinematicModel {
        &self.model
    }

    pub fn entity_of(&self, player_id: &Uuid) -> Option<EntityId> {
        self.by_player.get(player_id).copied()
    }

    /// Place an entity directly (scenario setup, tests)
    pub fn set_position(&mut self, entity: EntityId, position: Vec2) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.motion.position = position;
        }
    }

    pub fn health_of(&self, entity: EntityId) -> Option<f32> {
        self.bodies.get(&entity).map(|b| b.health)
    }

    fn spawn_position(&mut self) -> Vec2 {
        let extent = self.model.half_extent * 0.8;
        Vec2::new(
            self.rng.gen_range(-extent..=extent),
            self.rng.gen_range(-extent..=extent),
        )
    }
}

impl Simulation for KinematicWorld {
    fn spawn_player(&mut self, player_id: Uuid) -> EntityId {
        if let Some(existing) = self.by_player.get(&player_id) {
            return *existing;
        }
        let entity = self.next_entity;
        self.next_entity += 1;
        let position = self.spawn_position();
        self.bodies.insert(
            entity,
            Body {
                owner: player_id,
                motion: MotionState::new(position, Vec2::ZERO),
                health: self.max_health,
                deaths: 0,
            },
        );
        self.by_player.insert(player_id, entity);
        debug!(player_id = %player_id, entity, "Spawned player entity");
        entity
    }

    fn despawn_player(&mut self, player_id: Uuid, entity: EntityId) {
        self.by_player.remove(&player_id);
        self.bodies.remove(&entity);
    }

    fn apply_input(&mut self, entity: EntityId, command: &InputCommand) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.motion = self.model.apply(&body.motion, &command.kind);
            if let InputKind::UseItem { slot } = command.kind {
                debug!(entity, slot, "Item used");
            }
        }
    }

    fn apply_hit(&mut self, hit: &HitResult) {
        let respawn_at = self.spawn_position();
        if let Some(target) = self.bodies.get_mut(&hit.target) {
            let (health, dead) = apply_damage(target.health, ATTACK_DAMAGE);
            target.health = health;
            if dead {
                target.deaths += 1;
                target.health = self.max_health;
                target.motion = MotionState::new(respawn_at, Vec2::ZERO);
                info!(
                    player_id = %target.owner,
                    entity = hit.target,
                    killer = hit.attacker,
                    deaths = target.deaths,
                    "Entity destroyed, respawned"
                );
            }
        }
    }

    fn step(&mut self, _dt: f32) {
        // Movement is driven per input; nothing drifts between commands.
        for body in self.bodies.values_mut() {
            if !self.model.in_bounds(body.motion.position) {
                body.motion.position = Vec2::ZERO;
            }
        }
    }

    fn position_of(&self, entity: EntityId) -> Option<Vec2> {
        self.bodies.get(&entity).map(|b| b.motion.position)
    }

    fn entities(&self) -> Vec<EntitySnapshot> {
        self.bodies
            .iter()
            .map(|(id, body)| EntitySnapshot {
                entity_id: *id,
                position: body.motion.position,
                velocity: body.motion.velocity,
                radius: self.radius,
                health: body.health,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(player_id: Uuid, seq: u32, dir: Vec2) -> InputCommand {
        InputCommand {
            player_id,
            sequence: seq,
            kind: InputKind::Move { direction: dir },
            client_timestamp: 0,
        }
    }

    #[test]
    fn same_seed_same_spawns() {
        let players: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut a = KinematicWorld::new(KinematicModel::default(), 16.0, 42);
        let mut b = KinematicWorld::new(KinematicModel::default(), 16.0, 42);
        for p in &players {
            a.spawn_player(*p);
            b.spawn_player(*p);
        }
        assert_eq!(a.entities(), b.entities());
    }

    #[test]
    fn spawn_is_idempotent_per_player() {
        let mut world = KinematicWorld::new(KinematicModel::default(), 16.0, 1);
        let p = Uuid::new_v4();
        assert_eq!(world.spawn_player(p), world.spawn_player(p));
        assert_eq!(world.entities().len(), 1);
    }

    #[test]
    fn input_moves_entity() {
        let mut world = KinematicWorld::new(KinematicModel::new(100.0, 0.1, 1_000.0), 16.0, 1);
        let p = Uuid::new_v4();
        let e = world.spawn_player(p);
        world.set_position(e, Vec2::ZERO);
        world.apply_input(e, &cmd(p, 1, Vec2::new(0.0, 1.0)));
        assert!(world.position_of(e).unwrap().approx_eq(Vec2::new(0.0, 10.0), 1e-5));
    }

    #[test]
    fn lethal_hits_respawn_with_full_health() {
        let mut world = KinematicWorld::new(KinematicModel::default(), 16.0, 3);
        let attacker = world.spawn_player(Uuid::new_v4());
        let target = world.spawn_player(Uuid::new_v4());
        let hit = HitResult {
            attacker,
            target,
            distance: 1.0,
            point: Vec2::ZERO,
        };
        for _ in 0..3 {
            world.apply_hit(&hit);
        }
        assert_eq!(world.health_of(target), Some(25.0));
        world.apply_hit(&hit);
        assert_eq!(world.health_of(target), Some(100.0));
    }

    #[test]
    fn despawn_removes_entity() {
        let mut world = KinematicWorld::new(KinematicModel::default(), 16.0, 3);
        let p = Uuid::new_v4();
        let e = world.spawn_player(p);
        world.despawn_player(p, e);
        assert!(world.entities().is_empty());
        assert!(world.entity_of(&p).is_none());
    }
}
