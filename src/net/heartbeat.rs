//! Heartbeat monitor
//!
//! Prunes authenticated sessions whose last heartbeat is older than the
//! configured timeout. Bots have no connection and are exempt. The monitor
//! never blocks other tasks; it snapshots the session list and disconnects
//! stale entries through the registry.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::context::ServerContext;
use crate::game::constants::net::HEARTBEAT_POLL_MS;

pub fn spawn_heartbeat_monitor(server: &ServerContext) -> JoinHandle<()> {
    let server = server.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(HEARTBEAT_POLL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "heartbeat monitor running: timeout {}s",
            server.config.heartbeat_timeout_seconds
        );
        loop {
            tokio::select! {
                _ = server.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            prune_stale_sessions(&server);
        }
        info!("heartbeat monitor stopped");
    })
}

/// One monitor pass; returns how many sessions were pruned
pub fn prune_stale_sessions(server: &ServerContext) -> usize {
    let timeout = Duration::from_secs_f32(server.config.heartbeat_timeout_seconds);
    let mut pruned = 0;
    for session in server.registry.authenticated_sessions() {
        if session.is_bot {
            continue;
        }
        let age = session.heartbeat_age();
        if age > timeout {
            warn!(
                "session {} heartbeat stale ({:.1}s), disconnecting",
                session.connection_id,
                age.as_secs_f32()
            );
            server.registry.disconnect_session(&session);
            server
                .metrics
                .sessions_timed_out
                .fetch_add(1, Ordering::Relaxed);
            pruned += 1;
        }
    }
    pruned
}
