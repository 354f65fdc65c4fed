//! Inbound read loop.
//!
//! Reads one line at a time, answers protocol-internal traffic
//! (PING/PONG, registration, fatal numerics) and forwards everything
//! else to the external message handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;

use crate::client::Shared;
use crate::message::Message;
use crate::state::ConnectionState;
use crate::transport::Reader;

/// Read loop for one generation.
///
/// An empty or failed read never declares the connection dead. That
/// call belongs to the keepalive supervisor alone; this loop just backs
/// off for a second and tries again.
pub(crate) async fn run(shared: Arc<Shared>, mut reader: Reader, generation: u64) {
    let mut line = String::new();
    loop {
        shared.gate.wait_open().await;

        line.clear();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "read failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        if n == 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }

        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let msg = match Message::parse(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, raw = %raw, "dropping unparseable line");
                continue;
            }
        };

        match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing.as_deref().unwrap_or_default();
                if let Err(e) = shared.write_direct(&format!("PONG {token}")).await {
                    tracing::warn!(error = %e, "PONG reply failed");
                }
            }
            "PONG" => {
                shared.reset_awaiting_ping().await;
            }
            "001" => {
                tracing::info!(nick = %shared.credential.nick, "registration complete");
                shared.state.set(ConnectionState::Registered);
            }
            command if is_fatal_numeric(command) => {
                tracing::warn!(numeric = %command, "fatal server reply, reconnecting");
                let shared = shared.clone();
                tokio::spawn(async move {
                    shared.reconnect(generation).await;
                });
                return;
            }
            _ => {
                if let Err(e) = (shared.handler)(raw).await {
                    tracing::warn!(error = %e, "message handler failed");
                }
            }
        }
    }
}

/// Numeric replies in the 4xx and 5xx ranges are treated as fatal.
fn is_fatal_numeric(command: &str) -> bool {
    command.len() == 3
        && command.bytes().all(|b| b.is_ascii_digit())
        && matches!(command.as_bytes()[0], b'4' | b'5')
}

#[cfg(test)]
mod tests {
    use super::is_fatal_numeric;

    #[test]
    fn fatal_numeric_ranges() {
        assert!(is_fatal_numeric("433"));
        assert!(is_fatal_numeric("502"));
        assert!(!is_fatal_numeric("001"));
        assert!(!is_fatal_numeric("372"));
        assert!(!is_fatal_numeric("PRIVMSG"));
        assert!(!is_fatal_numeric("4"));
    }
}
