//! Connection manager: owns the transport, drives the reconnect state
//! machine, and exposes the application-facing handle.
//!
//! Every successful (re)connect starts a new *generation*: the read
//! loop, the outbound writer, and the keepalive pulse belong to exactly
//! one generation and are cancelled before the next one touches the
//! transport. The keepalive supervisor is the one loop that spans
//! generations, since it triggers some of the reconnects.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, Credential};
use crate::dispatcher;
use crate::error::ClientError;
use crate::message::format_line;
use crate::outbound;
use crate::state::{ConnectionState, Gate, StateCell};
use crate::transport::{self, Reader, Writer};
use crate::watchdog;

/// Future returned by one message-handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// External message handler.
///
/// Called once per received line the engine does not consume
/// internally, with the raw decoded line. The handler may complete
/// synchronously or suspend; either way it is awaited, and a failure is
/// logged without disturbing the read loop.
pub type MessageHandler = Arc<dyn Fn(String) -> HandlerFuture + Send + Sync>;

/// Post-handshake hook.
///
/// Returns raw lines written to the server directly after the login
/// sequence, before any channel replay: the place for capability
/// requests and similar handshake extensions.
pub type ConnectHook = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Tasks belonging to one connection generation.
struct GenerationTasks {
    dispatcher: JoinHandle<()>,
    outbound: JoinHandle<()>,
    pulse: JoinHandle<()>,
}

/// State shared by the manager, its loops, and application handles.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) credential: Credential,
    pub(crate) state: StateCell,
    /// Holds the read loop back until the handshake has settled.
    pub(crate) gate: Gate,
    /// Keepalive probes sent without a matching reply. Incremented only
    /// by the pulse, reset only under this same mutex.
    pub(crate) awaiting_ping: Mutex<u32>,
    /// Channels the application asked to join; the sole source of truth
    /// replayed after every reconnect.
    channels: parking_lot::Mutex<HashSet<String>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Drained by the current generation's writer loop.
    pub(crate) outbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    /// Write half of the current generation's transport.
    writer: Mutex<Option<Writer>>,
    /// Epoch counter; bumped on every successful reconnect. Loops and
    /// reconnect triggers are tagged with the generation they belong
    /// to, so a stale trigger cannot tear down its successor.
    generation: AtomicU64,
    /// Serializes reconnect attempts.
    reconnect_lock: Mutex<()>,
    tasks: parking_lot::Mutex<Option<GenerationTasks>>,
    pub(crate) handler: MessageHandler,
    on_connect: parking_lot::Mutex<Option<ConnectHook>>,
}

impl Shared {
    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Write one raw line (CRLF appended) straight to the transport,
    /// bypassing the outbound queue. Used for PONG replies and
    /// keepalive probes; a missing writer (mid-reconnect) is a no-op.
    pub(crate) async fn write_direct(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Reset the keepalive counter, under the same mutex the pulse
    /// increments it with.
    pub(crate) async fn reset_awaiting_ping(&self) {
        *self.awaiting_ping.lock().await = 0;
    }

    fn enqueue(&self, line: String) {
        // Unbounded queue: enqueueing never blocks the caller. The
        // receiver lives in this struct, so the send cannot fail.
        let _ = self.outbound_tx.send(line);
    }

    /// One connect attempt: transport plus login handshake.
    async fn attempt(&self) -> Result<(Reader, Writer)> {
        let (reader, mut writer) = transport::connect(&self.config).await?;
        let cred = &self.credential;
        writer
            .write_all(format!("PASS {}\r\n", cred.password).as_bytes())
            .await?;
        writer
            .write_all(format!("USER {} * * {}\r\n", cred.name, cred.name).as_bytes())
            .await?;
        writer
            .write_all(format!("NICK {}\r\n", cred.nick).as_bytes())
            .await?;
        writer.flush().await?;
        Ok((reader, writer))
    }

    /// Tear down the current generation and build the next one.
    ///
    /// The single re-entry point for every trigger: keepalive threshold,
    /// fatal server reply, initial startup. `trigger_generation` is the
    /// generation the caller observed failing; if a newer one is already
    /// live the trigger is stale and nothing happens.
    pub(crate) fn reconnect(
        self: Arc<Self>,
        trigger_generation: u64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        let _guard = self.reconnect_lock.lock().await;
        if trigger_generation != self.current_generation() {
            tracing::debug!(trigger_generation, "stale reconnect trigger ignored");
            return;
        }

        self.state.set(ConnectionState::Disconnected);
        self.gate.close();

        // Retire the superseded loops before touching the transport.
        // Cancellation lands at their next suspension point; awaiting
        // the handles makes sure none of them can still write.
        let retired = self.tasks.lock().take();
        if let Some(tasks) = retired {
            tasks.dispatcher.abort();
            tasks.outbound.abort();
            tasks.pulse.abort();
            let _ = tasks.dispatcher.await;
            let _ = tasks.outbound.await;
            let _ = tasks.pulse.await;
        }
        *self.writer.lock().await = None;

        // Retry forever on a fixed interval. No backoff or jitter; this
        // loop is the single place a different retry policy would go.
        let (reader, writer) = loop {
            match tokio::time::timeout(self.config.connect_timeout, self.attempt()).await {
                Ok(Ok(halves)) => break halves,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "connect attempt failed, retrying");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.config.connect_timeout,
                        "connect attempt timed out, retrying"
                    );
                }
            }
            tokio::time::sleep(self.config.retry_delay).await;
        };

        self.state.set(ConnectionState::Handshaking);
        self.reset_awaiting_ping().await;
        *self.writer.lock().await = Some(writer);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let next = GenerationTasks {
            dispatcher: tokio::spawn(dispatcher::run(self.clone(), reader, generation)),
            outbound: tokio::spawn(outbound::run(self.clone())),
            pulse: tokio::spawn(watchdog::pulse(self.clone())),
        };
        *self.tasks.lock() = Some(next);

        // Post-handshake hook, before any channel replay.
        let hook = self.on_connect.lock().clone();
        if let Some(hook) = hook {
            for line in hook() {
                if let Err(e) = self.write_direct(&line).await {
                    tracing::warn!(error = %e, "post-handshake hook write failed");
                }
            }
        }

        // Replay channel membership through the queue; order is
        // whatever the set yields.
        let channels: Vec<String> = self.channels.lock().iter().cloned().collect();
        for channel in channels {
            self.enqueue(format_line("JOIN", &[&channel]));
        }

        // Let the handshake banter land before the read loop starts.
        tokio::time::sleep(self.config.settle_delay).await;
        self.gate.open();
        tracing::info!(generation, server = %self.config.addr(), "connection established");
        })
    }
}

/// Application-facing handle. Every operation is a non-blocking
/// enqueue; cloneable and usable before [`Client::run`] so channels can
/// be queued up front.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Queue a raw command line.
    pub fn send(&self, raw: impl Into<String>) {
        self.shared.enqueue(raw.into());
    }

    /// Queue a JOIN and remember the channel for replay after
    /// reconnects. Membership is a set: joining twice replays once.
    pub fn join(&self, channel: &str) {
        let channel = normalize_channel(channel);
        self.shared.channels.lock().insert(channel.clone());
        self.shared.enqueue(format_line("JOIN", &[&channel]));
    }

    /// Queue a PART and drop the channel from replay.
    pub fn part(&self, channel: &str) {
        let channel = normalize_channel(channel);
        self.shared.channels.lock().remove(&channel);
        self.shared.enqueue(format_line("PART", &[&channel]));
    }

    /// Queue a PRIVMSG to a channel or nick.
    pub fn privmsg(&self, target: &str, text: &str) {
        self.shared.enqueue(format_line("PRIVMSG", &[target, text]));
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

/// The connection lifecycle engine. One instance manages one long-lived
/// server connection; all mutable state lives behind its shared handle,
/// so independent clients never interfere.
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    pub fn new(config: ClientConfig, credential: Credential, handler: MessageHandler) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            credential,
            state: StateCell::new(),
            gate: Gate::new(),
            awaiting_ping: Mutex::new(0),
            channels: parking_lot::Mutex::new(HashSet::new()),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnect_lock: Mutex::new(()),
            tasks: parking_lot::Mutex::new(None),
            handler,
            on_connect: parking_lot::Mutex::new(None),
        });
        Self { shared }
    }

    /// Install the post-handshake hook.
    pub fn on_connect(self, hook: ConnectHook) -> Self {
        *self.shared.on_connect.lock() = Some(hook);
        self
    }

    /// Handle for queueing commands.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start the engine and block until the process is torn down.
    ///
    /// The server address is resolved once up front; an unresolvable
    /// host (or, for TLS, an unusable server name) is the only
    /// startup-fatal error. Everything after that is absorbed by the
    /// reconnect state machine.
    pub async fn run(&self) -> Result<(), ClientError> {
        let addr = self.shared.config.addr();
        let mut resolved = tokio::net::lookup_host(addr.clone()).await.map_err(|source| {
            ClientError::Resolve {
                addr: addr.clone(),
                source,
            }
        })?;
        if resolved.next().is_none() {
            return Err(ClientError::Resolve {
                addr,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
            });
        }
        if self.shared.config.secured {
            transport::server_name(&self.shared.config.server)?;
        }

        tracing::info!(
            server = %self.shared.config.addr(),
            nick = %self.shared.credential.nick,
            "starting client"
        );

        let startup_generation = self.shared.current_generation();
        self.shared.clone().reconnect(startup_generation).await;
        watchdog::supervise(self.shared.clone()).await;
        Ok(())
    }
}

/// Channel names get a leading `#` when the caller omitted one.
fn normalize_channel(channel: &str) -> String {
    if channel.starts_with('#') || channel.starts_with('&') {
        channel.to_string()
    } else {
        format!("#{channel}")
    }
}
