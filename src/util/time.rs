//! Time utilities and timing constants for the world session

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Local movement simulation period
pub const MOVEMENT_TICK_MS: u64 = 50;
/// Render frame period for headless sessions (~60 fps)
pub const RENDER_FRAME_MS: u64 = 16;
/// Remote roster poll period (push syncs arrive in between)
pub const ROSTER_REFRESH_MS: u64 = 5_000;
/// Last-seen heartbeat period
pub const HEARTBEAT_MS: u64 = 10_000;
/// Minimum spacing between outbound snapshots / position writes
pub const PUBLISH_INTERVAL_MS: u64 = 300;

/// Staleness tolerated before a player drops out of the remote roster
pub const ROSTER_LIVENESS_MS: u64 = 30_000;
/// Staleness tolerated by the admin "who is online now" view
pub const ONLINE_NOW_WINDOW_MS: u64 = 2_000;

/// Allows at most one event per `interval_ms`.
///
/// Driven by caller-supplied timestamps so tick code stays deterministic.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval_ms: u64,
    last_fired: Option<u64>,
}

impl Throttle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired: None,
        }
    }

    /// Returns true (and arms the throttle) if enough time has passed since the last firing
    pub fn try_fire(&mut self, now_ms: u64) -> bool {
        match self.last_fired {
            Some(last) if now_ms.saturating_sub(last) < self.interval_ms => false,
            _ => {
                self.last_fired = Some(now_ms);
                true
            }
        }
    }

    /// Forget the last firing so the next call passes
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// True if `last_seen_ms` is within `window_ms` of `now_ms`
pub fn is_fresh(last_seen_ms: u64, now_ms: u64, window_ms: u64) -> bool {
    now_ms.saturating_sub(last_seen_ms) <= window_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_one_event_per_interval() {
        let mut throttle = Throttle::new(PUBLISH_INTERVAL_MS);

        assert!(throttle.try_fire(1_000));
        assert!(!throttle.try_fire(1_050));
        assert!(!throttle.try_fire(1_299));
        assert!(throttle.try_fire(1_300));
    }

    #[test]
    fn throttle_reset_lets_next_event_through() {
        let mut throttle = Throttle::new(300);
        assert!(throttle.try_fire(0));
        throttle.reset();
        assert!(throttle.try_fire(10));
    }

    #[test]
    fn freshness_uses_inclusive_window() {
        assert!(is_fresh(0, 30_000, ROSTER_LIVENESS_MS));
        assert!(!is_fresh(0, 30_001, ROSTER_LIVENESS_MS));
        // Clock skew never makes a future timestamp stale
        assert!(is_fresh(5_000, 1_000, ONLINE_NOW_WINDOW_MS));
    }
}
