//! Rate-limited outbound writer.
//!
//! Drains the unbounded command queue one line at a time with a fixed
//! minimum spacing between flushes: deliberate flood control, not a
//! correctness requirement. Waiting for registration before every
//! dequeue keeps application traffic strictly behind the login
//! handshake.

use std::sync::Arc;

use crate::client::Shared;

/// Queue consumer. One per generation; superseded instances are
/// cancelled at a suspension point, so at most one dequeued line can be
/// lost across a reconnect boundary.
pub(crate) async fn run(shared: Arc<Shared>) {
    loop {
        shared.state.wait_registered().await;
        let line = {
            let mut rx = shared.outbound_rx.lock().await;
            rx.recv().await
        };
        let Some(line) = line else {
            // The sender lives in Shared; closure means shutdown.
            return;
        };
        match shared.write_direct(&line).await {
            Ok(()) => tracing::trace!(line = %line, "sent"),
            Err(e) => {
                // The line is lost; the watchdog recovers the connection.
                tracing::warn!(error = %e, line = %line, "outbound write failed");
            }
        }
        tokio::time::sleep(shared.config.send_spacing).await;
    }
}
