//! Client estimate of the server clock

use crate::session::RttEstimator;
use crate::util::time::Timestamp;

/// Weight of a new offset sample
const OFFSET_SMOOTHING: f64 = 0.1;

/// Tracks `server_time - local_time` from ping/pong exchanges
#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    offset_ms: Option<f64>,
    /// At least one pong has been folded in
    synced: bool,
    rtt: RttEstimator,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse first guess from the welcome message, ignoring latency
    pub fn on_welcome(&mut self, server_time: Timestamp, local_now: Timestamp) {
        if self.offset_ms.is_none() {
            self.offset_ms = Some(server_time as f64 - local_now as f64);
        }
    }

    /// Fold in a pong that echoes our ping sent at `sent_at`
    pub fn on_pong(&mut self, sent_at: Timestamp, server_time: Timestamp, local_now: Timestamp) {
        if local_now < sent_at {
            return;
        }
        let rtt = (local_now - sent_at) as f64;
        self.rtt.record(rtt);

        // The server stamped the pong roughly half a round trip ago
        let sample = server_time as f64 + rtt / 2.0 - local_now as f64;
        self.offset_ms = Some(match self.offset_ms {
            Some(prev) if self.synced => prev + OFFSET_SMOOTHING * (sample - prev),
            _ => sample,
        });
        self.synced = true;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn offset_ms(&self) -> Option<f64> {
        self.offset_ms
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Server time corresponding to `local_now`
    pub fn server_now(&self, local_now: Timestamp) -> Timestamp {
        let offset = self.offset_ms.unwrap_or(0.0);
        (local_now as f64 + offset).max(0.0).round() as Timestamp
    }
}
