//! Lifecycle signals shared between the engine's loops.

use tokio::sync::watch;

/// Lifecycle of the single server connection.
///
/// `Registered` is reached only on the server's registration-success
/// numeric; it is the gate that unblocks the outbound queue and the
/// keepalive pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Registered,
}

/// Watchable connection state.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::channel(ConnectionState::Disconnected).0,
        }
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Suspend until the connection is registered.
    pub(crate) async fn wait_registered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as the shared state; wait_for cannot
        // fail while any loop still runs.
        let _ = rx.wait_for(|s| *s == ConnectionState::Registered).await;
    }
}

/// Boolean gate holding the read loop back until the handshake has
/// settled. Closed at the start of every reconnect, opened at its end.
pub(crate) struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::channel(false).0,
        }
    }

    pub(crate) fn open(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn close(&self) {
        self.tx.send_replace(false);
    }

    pub(crate) async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}
