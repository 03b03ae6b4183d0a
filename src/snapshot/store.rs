//! Capped, time-ordered history of world snapshots
//!
//! The tick loop is the single writer. Readers (broadcasters, the lag
//! compensator) take a [`HistoryView`], an immutable copy of the current tail,
//! so a lookup never holds the lock while it searches.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::error::NetError;
use crate::util::time::Timestamp;

use super::{EntityId, EntitySnapshot, WorldSnapshot};

/// The two snapshots enclosing a query time
#[derive(Debug, Clone)]
pub struct Bracket {
    pub before: Arc<WorldSnapshot>,
    pub after: Arc<WorldSnapshot>,
    /// `(t - before.timestamp) / (after.timestamp - before.timestamp)`
    pub frac: f64,
}

impl Bracket {
    /// Blend a single entity. Present in both: lerp. Only in `after`: snap to
    /// it. Only in `before`: gone.
    pub fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        match (self.before.entity(id), self.after.entity(id)) {
            (Some(from), Some(to)) => Some(blend(from, to, self.frac)),
            (None, Some(to)) => Some(*to),
            _ => None,
        }
    }

    /// Reconstruct every entity visible at the bracketed instant
    pub fn reconstruct(&self) -> HashMap<EntityId, EntitySnapshot> {
        self.after
            .entities
            .keys()
            .filter_map(|id| self.entity(*id).map(|e| (*id, e)))
            .collect()
    }

    /// Only entities that already existed at `before`, blended toward
    /// `after` where they survive. Spawns inside the bracket are left out.
    pub fn reconstruct_existing(&self) -> HashMap<EntityId, EntitySnapshot> {
        self.before
            .entities
            .iter()
            .map(|(id, from)| {
                let state = match self.after.entity(*id) {
                    Some(to) => blend(from, to, self.frac),
                    None => *from,
                };
                (*id, state)
            })
            .collect()
    }
}

fn blend(from: &EntitySnapshot, to: &EntitySnapshot, frac: f64) -> EntitySnapshot {
    if frac <= 0.0 {
        return *from;
    }
    if frac >= 1.0 {
        return *to;
    }
    EntitySnapshot {
        entity_id: to.entity_id,
        position: from.position.lerp(to.position, frac),
        velocity: from.velocity.lerp(to.velocity, frac),
        radius: from.radius,
        health: from.health,
    }
}

/// Result of a clamped at-or-before lookup
#[derive(Debug, Clone)]
pub struct Lookup {
    pub snapshot: Arc<WorldSnapshot>,
    /// The query predated the history and was served from the oldest entry
    pub clamped: bool,
}

/// Index of the earliest snapshot among those sharing the latest timestamp
/// `<= t`.
pub(crate) fn at_or_before_index(snapshots: &[Arc<WorldSnapshot>], t: Timestamp) -> Option<usize> {
    let count = snapshots.partition_point(|s| s.timestamp <= t);
    if count == 0 {
        return None;
    }
    let ts = snapshots[count - 1].timestamp;
    Some(snapshots.partition_point(|s| s.timestamp < ts))
}

/// Bracket `t` within a time-ordered slice; `None` outside the covered range.
pub(crate) fn bracket(snapshots: &[Arc<WorldSnapshot>], t: Timestamp) -> Option<Bracket> {
    let newest = snapshots.last()?;
    if t > newest.timestamp {
        return None;
    }
    let idx = at_or_before_index(snapshots, t)?;
    let before = &snapshots[idx];
    if before.timestamp == t {
        return Some(Bracket {
            before: before.clone(),
            after: before.clone(),
            frac: 0.0,
        });
    }
    let after_idx = snapshots.partition_point(|s| s.timestamp <= t);
    let after = snapshots.get(after_idx)?;
    let span = (after.timestamp - before.timestamp) as f64;
    Some(Bracket {
        before: before.clone(),
        after: after.clone(),
        frac: (t - before.timestamp) as f64 / span,
    })
}

/// Immutable, consistent copy of the history at one instant
#[derive(Debug, Clone, Default)]
pub struct HistoryView {
    snapshots: Arc<Vec<Arc<WorldSnapshot>>>,
}

impl HistoryView {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn oldest(&self) -> Option<&Arc<WorldSnapshot>> {
        self.snapshots.first()
    }

    pub fn newest(&self) -> Option<&Arc<WorldSnapshot>> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<WorldSnapshot>> {
        self.snapshots.iter()
    }

    pub fn lookup(&self, t: Timestamp) -> Option<Bracket> {
        bracket(&self.snapshots, t)
    }

    pub fn lookup_at_or_before(&self, t: Timestamp) -> Option<Arc<WorldSnapshot>> {
        at_or_before_index(&self.snapshots, t).map(|idx| self.snapshots[idx].clone())
    }

    /// At-or-before, falling back to the oldest snapshot when `t` predates
    /// the retained history. `None` only when the history is empty.
    pub fn lookup_clamped(&self, t: Timestamp) -> Option<Lookup> {
        if let Some(snapshot) = self.lookup_at_or_before(t) {
            return Some(Lookup {
                snapshot,
                clamped: false,
            });
        }
        self.oldest().map(|oldest| Lookup {
            snapshot: oldest.clone(),
            clamped: true,
        })
    }
}

/// Fixed-capacity snapshot ring shared between the tick loop and its readers
#[derive(Debug)]
pub struct SnapshotStore {
    capacity: usize,
    tail: RwLock<Arc<Vec<Arc<WorldSnapshot>>>>,
}

impl SnapshotStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tail: RwLock::new(Arc::new(Vec::with_capacity(capacity))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a snapshot, evicting the oldest when full.
    ///
    /// Snapshots must arrive in non-decreasing timestamp order; an older one
    /// is rejected and the history is left untouched.
    pub fn add(&self, snapshot: impl Into<Arc<WorldSnapshot>>) -> Result<(), NetError> {
        let snapshot = snapshot.into();
        let mut tail = self.tail.write();

        if let Some(newest) = tail.last() {
            if snapshot.timestamp < newest.timestamp {
                warn!(
                    newest = newest.timestamp,
                    got = snapshot.timestamp,
                    "Rejected out-of-order snapshot"
                );
                return Err(NetError::NonMonotonicSnapshot {
                    newest: newest.timestamp,
                    got: snapshot.timestamp,
                });
            }
        }

        let skip = (tail.len() + 1).saturating_sub(self.capacity);
        let mut next = Vec::with_capacity(self.capacity);
        next.extend(tail.iter().skip(skip).cloned());
        next.push(snapshot);
        if skip > 0 {
            trace!(evicted = skip, "Evicted oldest snapshots");
        }
        *tail = Arc::new(next);
        Ok(())
    }

    /// Consistent read-only copy of the current history
    pub fn view(&self) -> HistoryView {
        HistoryView {
            snapshots: self.tail.read().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.tail.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tail.read().is_empty()
    }

    pub fn oldest(&self) -> Option<Arc<WorldSnapshot>> {
        self.tail.read().first().cloned()
    }

    pub fn newest(&self) -> Option<Arc<WorldSnapshot>> {
        self.tail.read().last().cloned()
    }

    pub fn lookup(&self, t: Timestamp) -> Option<Bracket> {
        self.view().lookup(t)
    }

    pub fn lookup_at_or_before(&self, t: Timestamp) -> Option<Arc<WorldSnapshot>> {
        self.view().lookup_at_or_before(t)
    }

    pub fn lookup_clamped(&self, t: Timestamp) -> Option<Lookup> {
        self.view().lookup_clamped(t)
    }
}
