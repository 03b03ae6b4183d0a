//! Hit detection against (possibly rewound) entity state

use crate::snapshot::{EntityId, EntitySnapshot, Vec2};

/// Damage dealt by one landed attack
pub const ATTACK_DAMAGE: f32 = 25.0;

/// A hitscan query: a ray from `origin` along `direction`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitQuery {
    /// Entity performing the attack; never hits itself
    pub attacker: EntityId,
    pub origin: Vec2,
    /// Unit vector
    pub direction: Vec2,
    pub range: f32,
}

impl HitQuery {
    /// Build a query from a raw aim vector; `None` if the aim has no direction
    pub fn new(attacker: EntityId, origin: Vec2, aim: Vec2, range: f32) -> Option<Self> {
        Some(Self {
            attacker,
            origin,
            direction: aim.normalized()?,
            range,
        })
    }
}

/// Hit result from combat resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub attacker: EntityId,
    pub target: EntityId,
    /// Distance along the ray to the hitbox surface
    pub distance: f32,
    pub point: Vec2,
}

/// Distance along the ray to a circle, if it is hit within `range`
fn ray_circle(query: &HitQuery, center: Vec2, radius: f32) -> Option<f32> {
    let m = query.origin - center;
    let b = m.dot(query.direction);
    let c = m.length_squared() - radius * radius;
    if c > 0.0 && b > 0.0 {
        // Outside and pointing away
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()).max(0.0);
    (t <= query.range).then_some(t)
}

/// Nearest entity hit by `query`. Equal distances resolve to the lowest id so
/// the outcome never depends on map iteration order.
pub fn raycast<'a>(
    query: &HitQuery,
    entities: impl IntoIterator<Item = &'a EntitySnapshot>,
) -> Option<HitResult> {
    entities
        .into_iter()
        .filter(|e| e.entity_id != query.attacker)
        .filter_map(|e| ray_circle(query, e.position, e.radius).map(|t| (t, e.entity_id)))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(distance, target)| HitResult {
            attacker: query.attacker,
            target,
            distance,
            point: query.origin + query.direction * distance,
        })
}

/// Apply damage to health, returns (new_health, is_dead)
pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
    let new_health = (current_health - damage).max(0.0);
    (new_health, new_health <= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: EntityId, x: f32, y: f32) -> EntitySnapshot {
        EntitySnapshot::new(id, Vec2::new(x, y), Vec2::ZERO).with_radius(5.0)
    }

    fn query_east(range: f32) -> HitQuery {
        HitQuery::new(0, Vec2::ZERO, Vec2::new(1.0, 0.0), range).unwrap()
    }

    #[test]
    fn hits_nearest_target_on_ray() {
        let targets = [target(1, 100.0, 0.0), target(2, 50.0, 3.0), target(3, 0.0, 50.0)];
        let hit = raycast(&query_east(500.0), &targets).unwrap();
        assert_eq!(hit.target, 2);
        assert!(hit.distance < 50.0);
    }

    #[test]
    fn misses_out_of_range_and_behind() {
        let targets = [target(1, 100.0, 0.0), target(2, -50.0, 0.0)];
        assert!(raycast(&query_east(80.0), &targets).is_none());
    }

    #[test]
    fn never_hits_attacker() {
        let targets = [target(0, 1.0, 0.0)];
        assert!(raycast(&query_east(100.0), &targets).is_none());
    }

    #[test]
    fn ties_resolve_to_lowest_id() {
        let targets = [target(9, 40.0, 0.0), target(4, 40.0, 0.0)];
        assert_eq!(raycast(&query_east(100.0), &targets).unwrap().target, 4);
    }

    #[test]
    fn damage_floors_at_zero() {
        assert_eq!(apply_damage(10.0, 25.0), (0.0, true));
        assert_eq!(apply_damage(100.0, 25.0), (75.0, false));
    }
}
