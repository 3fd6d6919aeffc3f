//! Heartbeat bookkeeping and the watchdog evaluation

use crate::config::LinkConfig;
use tokio::time::Instant;
use tracing::debug;

/// Heartbeat sample for the open connection.
///
/// Mutated only by the link worker's heartbeat paths; read by the
/// reconnection logic to decide whether to force a reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct LivenessSample {
    pub last_ping_sent_at: Option<Instant>,
    pub last_pong_received_at: Option<Instant>,
    pub consecutive_misses: u32,
}

impl LivenessSample {
    /// Baseline the sample when a socket opens. The connect moment counts
    /// as the last sign of life so the watchdog measures real silence.
    pub fn arm(&mut self, now: Instant) {
        self.last_ping_sent_at = None;
        self.last_pong_received_at = Some(now);
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping_sent_at = Some(now);
    }

    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong_received_at = Some(now);
        self.consecutive_misses = 0;
    }

    /// One watchdog evaluation. A miss is counted when pong silence has
    /// exceeded its window AND the last ping is old enough that the station
    /// had a fair chance to answer; that second condition limits misses to
    /// one per ping cycle. Returns true when the miss limit is reached, at
    /// which point the counter resets and the caller must force a reconnect.
    pub fn evaluate(&mut self, now: Instant, config: &LinkConfig) -> bool {
        let pong_silent = match self.last_pong_received_at {
            Some(at) => now.duration_since(at) >= config.pong_timeout,
            None => true,
        };
        let ping_stale = match self.last_ping_sent_at {
            Some(at) => now.duration_since(at) >= config.ping_stale,
            None => false,
        };

        if !(pong_silent && ping_stale) {
            return false;
        }

        self.consecutive_misses += 1;
        debug!(
            consecutive_misses = self.consecutive_misses,
            miss_limit = config.miss_limit,
            "heartbeat miss"
        );

        if self.consecutive_misses >= config.miss_limit {
            self.consecutive_misses = 0;
            return true;
        }
        false
    }
}
