//! Client-side prediction and reconciliation
//!
//! ```text
//! Input:      [1] [2] [3] [4] [5]
//! Prediction: [P1][P2][P3][P4][P5]
//! Server ack:         [S3]
//! Reconcile:  compare P3 with S3
//!             match    -> drop 1..=3
//!             mismatch -> snap to S3, replay [4, 5]
//! ```

use std::collections::VecDeque;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::game::physics::{InputModel, MotionState};
use crate::input::{InputCommand, InputKind};
use crate::snapshot::{EntitySnapshot, Vec2};
use crate::util::time::Timestamp;

/// Lifecycle of one predicted input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    /// Sent, not yet acknowledged
    Pending,
    /// The server confirmed exactly this sequence
    Acknowledged,
    /// A later acknowledgement made it moot
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictedInput {
    pub sequence: u32,
    pub kind: InputKind,
    /// Local state right after applying this input
    pub state_after: MotionState,
    pub status: InputStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Not newer than what was already reconciled
    Ignored { acked: u32, last_reconciled: u32 },
    /// Prediction held
    Confirmed { acked: u32, retired: usize },
    /// Snapped to the server and replayed the remaining inputs
    Corrected {
        acked: u32,
        retired: usize,
        replayed: usize,
        /// Distance between predicted and authoritative position
        error: f32,
    },
}

/// Decaying visual offset so small corrections don't pop
#[derive(Debug, Clone, Copy)]
pub struct CorrectionSmoothing {
    offset: Vec2,
    threshold: f32,
    decay_rate: f32,
}

impl CorrectionSmoothing {
    pub fn new(threshold: f32, decay_rate: f32) -> Self {
        Self {
            offset: Vec2::ZERO,
            threshold,
            decay_rate,
        }
    }

    /// Record a jump of the logical position by `delta`
    pub fn apply_correction(&mut self, delta: Vec2) {
        if delta.length() < self.threshold {
            self.offset = self.offset - delta;
        } else {
            self.offset = Vec2::ZERO;
        }
    }

    pub fn update(&mut self, dt: f32) {
        self.offset = self.offset * (-self.decay_rate * dt).exp();
        if self.offset.length_squared() < 1e-4 {
            self.offset = Vec2::ZERO;
        }
    }

    pub fn clear(&mut self) {
        self.offset = Vec2::ZERO;
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }
}

/// Predicts the locally controlled entity
pub struct Predictor<M: InputModel> {
    model: M,
    player_id: Uuid,
    state: MotionState,
    next_sequence: u32,
    history: VecDeque<PredictedInput>,
    last_reconciled: u32,
    max_history: usize,
    epsilon: f32,
    stalled: bool,
    smoothing: CorrectionSmoothing,
}

impl<M: InputModel> Predictor<M> {
    pub fn new(model: M, player_id: Uuid, initial: MotionState, config: &ClientConfig) -> Self {
        Self {
            model,
            player_id,
            state: initial,
            next_sequence: 1,
            history: VecDeque::new(),
            last_reconciled: 0,
            max_history: config.max_predicted_history.max(1),
            epsilon: config.reconcile_epsilon,
            stalled: false,
            smoothing: CorrectionSmoothing::new(config.smoothing_threshold, config.smoothing_decay),
        }
    }

    /// Apply an input immediately and return the command to transmit
    pub fn apply_local(&mut self, kind: InputKind, client_timestamp: Timestamp) -> InputCommand {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);

        self.state = self.model.apply(&self.state, &kind);

        if self.history.len() >= self.max_history {
            if let Some(dropped) = self.history.pop_front() {
                warn!(
                    player_id = %self.player_id,
                    dropped_seq = dropped.sequence,
                    last_reconciled = self.last_reconciled,
                    "Prediction history full, server not acknowledging"
                );
            }
            self.stalled = true;
        }

        self.history.push_back(PredictedInput {
            sequence,
            kind,
            state_after: self.state,
            status: InputStatus::Pending,
        });

        InputCommand {
            player_id: self.player_id,
            sequence,
            kind,
            client_timestamp,
        }
    }

    /// Reconcile against the server's state for our entity after it applied
    /// everything up to `acked`.
    pub fn reconcile(&mut self, acked: u32, authoritative: &EntitySnapshot) -> ReconcileOutcome {
        if acked <= self.last_reconciled {
            return ReconcileOutcome::Ignored {
                acked,
                last_reconciled: self.last_reconciled,
            };
        }

        let mut predicted = None;
        for entry in self.history.iter_mut().take_while(|e| e.sequence <= acked) {
            if entry.sequence == acked {
                entry.status = InputStatus::Acknowledged;
                predicted = Some(entry.state_after);
            } else {
                entry.status = InputStatus::Superseded;
            }
        }
        let retired = self
            .history
            .iter()
            .take_while(|e| e.status != InputStatus::Pending)
            .count();
        self.history.drain(..retired);
        self.last_reconciled = acked;
        self.stalled = false;

        let server = MotionState::from(authoritative);
        if let Some(predicted) = predicted {
            if predicted.approx_eq(&server, self.epsilon) {
                return ReconcileOutcome::Confirmed { acked, retired };
            }
        }

        // Misprediction: rewind to the server state and replay what it has not seen
        let before = self.state;
        let mut state = server;
        for entry in self.history.iter_mut() {
            state = self.model.apply(&state, &entry.kind);
            entry.state_after = state;
        }
        self.state = state;
        self.smoothing.apply_correction(self.state.position - before.position);

        let error = predicted
            .map(|p| p.position.distance(server.position))
            .unwrap_or_else(|| before.position.distance(self.state.position));
        debug!(
            player_id = %self.player_id,
            acked,
            error,
            replayed = self.history.len(),
            "Misprediction corrected"
        );

        ReconcileOutcome::Corrected {
            acked,
            retired,
            replayed: self.history.len(),
            error,
        }
    }

    /// Overwrite the predicted state, e.g. on (re)spawn with nothing pending
    pub fn reset(&mut self, state: MotionState) {
        self.state = state;
        self.smoothing.clear();
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Logical position plus the decaying correction offset
    pub fn render_position(&self) -> Vec2 {
        self.state.position + self.smoothing.offset()
    }

    pub fn advance_smoothing(&mut self, dt: f32) {
        self.smoothing.update(dt);
    }

    pub fn history(&self) -> impl Iterator<Item = &PredictedInput> {
        self.history.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_reconciled(&self) -> u32 {
        self.last_reconciled
    }

    /// History overflowed since the last acknowledgement
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::KinematicModel;

    fn predictor() -> Predictor<KinematicModel> {
        Predictor::new(
            KinematicModel::new(1.0, 1.0, 1_000.0),
            Uuid::nil(),
            MotionState::default(),
            &ClientConfig::default(),
        )
    }

    fn right() -> InputKind {
        InputKind::Move { direction: Vec2::new(1.0, 0.0) }
    }

    fn server_at(x: f32) -> EntitySnapshot {
        EntitySnapshot::new(1, Vec2::new(x, 0.0), Vec2::new(1.0, 0.0))
    }

    #[test]
    fn sequences_start_at_one_and_increase() {
        let mut p = predictor();
        let a = p.apply_local(right(), 0);
        let b = p.apply_local(right(), 0);
        assert_eq!((a.sequence, b.sequence), (1, 2));
        assert_eq!(p.state().position, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn duplicate_and_old_acks_ignored() {
        let mut p = predictor();
        for _ in 0..3 {
            p.apply_local(right(), 0);
        }
        assert!(matches!(p.reconcile(2, &server_at(2.0)), ReconcileOutcome::Confirmed { .. }));
        assert_eq!(
            p.reconcile(2, &server_at(9.0)),
            ReconcileOutcome::Ignored { acked: 2, last_reconciled: 2 }
        );
        assert_eq!(
            p.reconcile(1, &server_at(9.0)),
            ReconcileOutcome::Ignored { acked: 1, last_reconciled: 2 }
        );
        assert_eq!(p.state().position, Vec2::new(3.0, 0.0));
    }

    #[test]
    fn gap_in_acks_supersedes_skipped_inputs() {
        let mut p = predictor();
        for _ in 0..4 {
            p.apply_local(right(), 0);
        }
        let outcome = p.reconcile(3, &server_at(3.0));
        assert_eq!(outcome, ReconcileOutcome::Confirmed { acked: 3, retired: 3 });
        let remaining: Vec<_> = p.history().map(|e| (e.sequence, e.status)).collect();
        assert_eq!(remaining, vec![(4, InputStatus::Pending)]);
    }

    #[test]
    fn overflow_drops_oldest_and_flags_stall() {
        let config = ClientConfig {
            max_predicted_history: 3,
            ..ClientConfig::default()
        };
        let mut p = Predictor::new(
            KinematicModel::new(1.0, 1.0, 1_000.0),
            Uuid::nil(),
            MotionState::default(),
            &config,
        );
        for _ in 0..5 {
            p.apply_local(right(), 0);
        }
        assert_eq!(p.pending_len(), 3);
        assert!(p.is_stalled());
        assert_eq!(p.history().next().unwrap().sequence, 3);

        // Acked entry 1 was dropped: no prediction to compare, so snap and replay
        let outcome = p.reconcile(1, &server_at(1.0));
        assert!(matches!(outcome, ReconcileOutcome::Corrected { replayed: 3, .. }));
        assert!(!p.is_stalled());
        assert_eq!(p.state().position, Vec2::new(4.0, 0.0));
    }

    #[test]
    fn small_corrections_are_smoothed() {
        let mut p = predictor();
        for _ in 0..2 {
            p.apply_local(right(), 0);
        }
        p.reconcile(1, &server_at(0.5));
        assert_eq!(p.state().position, Vec2::new(1.5, 0.0));
        // Rendered where it was before the correction, then converges
        assert!(p.render_position().approx_eq(Vec2::new(2.0, 0.0), 1e-5));
        for _ in 0..100 {
            p.advance_smoothing(0.05);
        }
        assert_eq!(p.render_position(), p.state().position);
    }
}
