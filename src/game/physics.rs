//! Deterministic movement shared by the server simulation and client prediction

use crate::input::InputKind;
use crate::snapshot::{EntitySnapshot, Vec2};

/// The part of an entity's state that input can change
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionState {
    pub position: Vec2,
    pub velocity: Vec2,
}

impl MotionState {
    pub fn new(position: Vec2, velocity: Vec2) -> Self {
        Self { position, velocity }
    }

    pub fn approx_eq(&self, other: &MotionState, epsilon: f32) -> bool {
        self.position.approx_eq(other.position, epsilon)
            && self.velocity.approx_eq(other.velocity, epsilon)
    }
}

impl From<&EntitySnapshot> for MotionState {
    fn from(entity: &EntitySnapshot) -> Self {
        Self {
            position: entity.position,
            velocity: entity.velocity,
        }
    }
}

/// Applies one input to a motion state.
///
/// Client and server must run the same model or every prediction will be
/// corrected.
pub trait InputModel {
    fn apply(&self, state: &MotionState, input: &InputKind) -> MotionState;
}

/// Constant-speed top-down movement inside a square arena
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicModel {
    /// Units per second at full input
    pub speed: f32,
    /// Seconds of movement one input represents
    pub step: f32,
    /// Arena spans `[-half_extent, half_extent]` on both axes
    pub half_extent: f32,
}

impl KinematicModel {
    pub fn new(speed: f32, step: f32, half_extent: f32) -> Self {
        Self {
            speed,
            step,
            half_extent,
        }
    }

    /// Check if a point is inside the arena
    pub fn in_bounds(&self, p: Vec2) -> bool {
        p.x.abs() <= self.half_extent && p.y.abs() <= self.half_extent
    }

    fn clamp_to_arena(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            p.x.clamp(-self.half_extent, self.half_extent),
            p.y.clamp(-self.half_extent, self.half_extent),
        )
    }
}

impl Default for KinematicModel {
    fn default() -> Self {
        Self::new(200.0, 1.0 / 20.0, 1_000.0)
    }
}

impl InputModel for KinematicModel {
    fn apply(&self, state: &MotionState, input: &InputKind) -> MotionState {
        match input {
            InputKind::Move { direction } => {
                // Re-check length: the model must stay bounded even on unvalidated input
                let direction = if direction.length() > 1.0 {
                    direction.normalized().unwrap_or(Vec2::ZERO)
                } else {
                    *direction
                };
                let velocity = direction * self.speed;
                let position = self.clamp_to_arena(state.position + velocity * self.step);
                MotionState { position, velocity }
            }
            InputKind::Attack { .. } | InputKind::UseItem { .. } => *state,
        }
    }
}
