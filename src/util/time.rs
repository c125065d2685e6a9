//! Time utilities for the tick loops

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

/// Participant ticks per second, one per rendered frame
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Highest accepted tick rate
pub const MAX_TICK_RATE: u32 = 1000;

/// How often the hub flushes operations whose latency has elapsed
pub const HUB_DELIVERY_PERIOD: Duration = Duration::from_millis(5);

/// How long a game inspection waits for the game to replicate
pub const INSPECTION_WAIT: Duration = Duration::from_secs(2);

/// Frame delta in seconds at `tick_rate`
pub fn tick_delta(tick_rate: u32) -> f32 {
    1.0 / tick_rate.clamp(1, MAX_TICK_RATE) as f32
}

/// Interval between ticks at `tick_rate`, never zero
pub fn tick_period(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.clamp(1, MAX_TICK_RATE) as u64)
}
