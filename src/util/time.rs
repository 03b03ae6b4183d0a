//! Time utilities: the shared timestamp/tick space

use std::time::Duration;

use tokio::time::Instant;

/// Milliseconds on the server's monotonic clock.
pub type Timestamp = u64;

/// Monotonic server clock. Every snapshot and lag-compensation query is
/// expressed in milliseconds since this clock's start.
#[derive(Debug, Clone, Copy)]
pub struct ServerClock {
    start: Instant,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Current server time
    pub fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }

    /// Server uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts between server timestamps and the fixed tick space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickClock {
    tick_rate_hz: u32,
}

impl TickClock {
    pub fn new(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz: tick_rate_hz.max(1),
        }
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Duration of one tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate_hz as u64)
    }

    /// Tick length in whole milliseconds (at least 1)
    pub fn tick_interval_ms(&self) -> u64 {
        (1000 / self.tick_rate_hz as u64).max(1)
    }

    /// Delta time for one simulation step (in seconds)
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate_hz as f32
    }

    /// Tick containing the given timestamp
    pub fn tick_at(&self, ts: Timestamp) -> u64 {
        ts.saturating_mul(self.tick_rate_hz as u64) / 1000
    }

    /// Start timestamp of a tick
    pub fn timestamp_of(&self, tick: u64) -> Timestamp {
        tick.saturating_mul(1000) / self.tick_rate_hz as u64
    }

    /// Number of ticks needed to cover `secs` of history (rounded up)
    pub fn ticks_for_secs(&self, secs: f64) -> usize {
        (secs.max(0.0) * self.tick_rate_hz as f64).ceil() as usize
    }
}
