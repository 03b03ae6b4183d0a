//! Snapshot types and the shared snapshot history

pub mod store;

pub use store::{Bracket, HistoryView, Lookup, SnapshotStore};

use std::collections::HashMap;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::util::time::Timestamp;

/// Entity identity, owned by the authoritative simulation
pub type EntityId = u64;

/// Plain 2D vector used for positions and velocities
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit vector, or `None` for a (near) zero vector
    pub fn normalized(self) -> Option<Vec2> {
        let len = self.length();
        if len > f32::EPSILON && len.is_finite() {
            Some(self * (1.0 / len))
        } else {
            None
        }
    }

    /// Linear blend, `frac` in `[0, 1]`
    pub fn lerp(self, to: Vec2, frac: f64) -> Vec2 {
        Vec2 {
            x: (self.x as f64 + (to.x as f64 - self.x as f64) * frac) as f32,
            y: (self.y as f64 + (to.y as f64 - self.y as f64) * frac) as f32,
        }
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    /// Component-wise comparison within `epsilon`
    pub fn approx_eq(self, other: Vec2, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon && (self.y - other.y).abs() <= epsilon
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

fn default_radius() -> f32 {
    16.0
}

fn default_health() -> f32 {
    100.0
}

/// One entity's observable state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Hitbox radius
    #[serde(default = "default_radius")]
    pub radius: f32,
    #[serde(default = "default_health")]
    pub health: f32,
}

impl EntitySnapshot {
    pub fn new(entity_id: EntityId, position: Vec2, velocity: Vec2) -> Self {
        Self {
            entity_id,
            position,
            velocity,
            radius: default_radius(),
            health: default_health(),
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }
}

/// Authoritative world state at one server tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub timestamp: Timestamp,
    pub tick: u64,
    pub entities: HashMap<EntityId, EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn new(timestamp: Timestamp, tick: u64) -> Self {
        Self {
            timestamp,
            tick,
            entities: HashMap::new(),
        }
    }

    /// Build a snapshot from an entity iterator
    pub fn from_entities(
        timestamp: Timestamp,
        tick: u64,
        entities: impl IntoIterator<Item = EntitySnapshot>,
    ) -> Self {
        Self {
            timestamp,
            tick,
            entities: entities.into_iter().map(|e| (e.entity_id, e)).collect(),
        }
    }

    pub fn with_entity(mut self, entity: EntitySnapshot) -> Self {
        self.entities.insert(entity.entity_id, entity);
        self
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_hits_both_endpoints() {
        let a = Vec2::new(0.0, 10.0);
        let b = Vec2::new(10.0, -10.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 0.5), Vec2::new(5.0, 0.0));
    }

    #[test]
    fn zero_vector_has_no_direction() {
        assert!(Vec2::ZERO.normalized().is_none());
        let n = Vec2::new(3.0, 4.0).normalized().unwrap();
        assert!(n.approx_eq(Vec2::new(0.6, 0.8), 1e-6));
    }

    #[test]
    fn extra_fields_default_when_missing() {
        let json = r#"{"entity_id":7,"position":{"x":1.0,"y":2.0},"velocity":{"x":0.0,"y":0.0}}"#;
        let entity: EntitySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(entity.entity_id, 7);
        assert_eq!(entity.radius, 16.0);
        assert_eq!(entity.health, 100.0);
    }
}
