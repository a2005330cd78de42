//! Process-wide counters and gauges
//!
//! All updates use relaxed atomics; readers only ever see point-in-time
//! values for logging. Exposition endpoints are out of scope for the core
//! engine, so this registry is consumed by the periodic summary log only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Metrics {
    // Gauges
    pub connections_active: AtomicU64,
    pub connected_players: AtomicU64,
    pub active_matches: AtomicU64,
    pub bots_in_match: AtomicU64,

    // Counters
    pub matches_started: AtomicU64,
    pub frames_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub sessions_timed_out: AtomicU64,

    // Tick timing (microseconds)
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connected_players: AtomicU64::new(0),
            active_matches: AtomicU64::new(0),
            bots_in_match: AtomicU64::new(0),
            matches_started: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            sessions_timed_out: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_tick(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_time_max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// One-line state summary for the periodic log
    pub fn summary(&self) -> String {
        format!(
            "up {}s, {} conns, {} players, {} matches ({} started), {} bots, last tick {}us (max {}us)",
            self.uptime().as_secs(),
            self.connections_active.load(Ordering::Relaxed),
            self.connected_players.load(Ordering::Relaxed),
            self.active_matches.load(Ordering::Relaxed),
            self.matches_started.load(Ordering::Relaxed),
            self.bots_in_match.load(Ordering::Relaxed),
            self.tick_time_us.load(Ordering::Relaxed),
            self.tick_time_max_us.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturating gauge decrement; gauges never wrap below zero
pub fn gauge_dec(gauge: &AtomicU64) {
    let mut current = gauge.load(Ordering::Relaxed);
    while current > 0 {
        match gauge.compare_exchange_weak(
            current,
            current - 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}
