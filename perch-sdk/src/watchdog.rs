//! Keepalive supervision: the probe pulse and the reconnect supervisor.
//!
//! The pulse and the PONG handler share one counter under a single
//! mutex. The supervisor compares that counter against the threshold
//! once per second and forces a reconnect when too many probes have
//! gone unanswered. Silent connection death produces no transport
//! error, so this is the only loop allowed to declare it.

use std::sync::Arc;
use std::time::Duration;

use crate::client::Shared;
use crate::state::ConnectionState;

/// Probe sender. One per generation: while the connection is
/// registered, writes `PING :<target>` every `ping_interval` and
/// increments the outstanding-probe counter.
pub(crate) async fn pulse(shared: Arc<Shared>) {
    let target = shared.config.ping_host().to_string();
    loop {
        shared.state.wait_registered().await;
        if let Err(e) = shared.write_direct(&format!("PING :{target}")).await {
            tracing::warn!(error = %e, "keepalive probe write failed");
        }
        *shared.awaiting_ping.lock().await += 1;
        tokio::time::sleep(shared.config.ping_interval).await;
    }
}

/// Reconnect supervisor. Spans generations: it is the one loop never
/// cancelled on reconnect, since it is the trigger for some of them.
pub(crate) async fn supervise(shared: Arc<Shared>) {
    loop {
        shared.state.wait_registered().await;
        let outstanding = *shared.awaiting_ping.lock().await;
        if outstanding >= shared.config.max_awaiting_ping {
            tracing::warn!(outstanding, "keepalive threshold reached, forcing reconnect");
            shared.state.set(ConnectionState::Disconnected);
            let generation = shared.current_generation();
            shared.clone().reconnect(generation).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
