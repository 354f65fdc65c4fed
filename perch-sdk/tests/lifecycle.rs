//! Connection lifecycle tests against a scripted in-process server.
//!
//! Each test binds a real TCP listener and plays the server's side of
//! the protocol by hand. Covered:
//! - login handshake ordering and registration gating of the queue
//! - PING/PONG reply behavior
//! - minimum spacing between queued sends
//! - channel replay after a fatal-numeric reconnect (and not after PART)
//! - keepalive watchdog forcing a reconnect when probes go unanswered
//! - handler failures and malformed lines never killing the read loop

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, tcp::OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

use perch_sdk::{Client, ClientConfig, ConnectionState, Credential, MessageHandler};

/// How long to wait for a line before considering the test failed.
const TIMEOUT: Duration = Duration::from_secs(10);

/// Config tuned for fast tests; individual tests override the
/// watchdog knobs where they matter.
fn test_config(listener: &TcpListener) -> ClientConfig {
    let addr = listener.local_addr().unwrap();
    ClientConfig {
        server: addr.ip().to_string(),
        port: addr.port(),
        send_spacing: Duration::from_millis(50),
        settle_delay: Duration::from_millis(50),
        retry_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

fn noop_handler() -> MessageHandler {
    Arc::new(|_line| Box::pin(async { Ok(()) }))
}

async fn bind_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

fn spawn_client(client: Client) {
    tokio::spawn(async move {
        let _ = client.run().await;
    });
}

// ── Scripted server ──────────────────────────────────────────────

/// One accepted client connection. Received lines are timestamped at
/// arrival so spacing assertions are not skewed by test scheduling.
struct Session {
    lines: mpsc::UnboundedReceiver<(Instant, String)>,
    writer: OwnedWriteHalf,
}

async fn accept_session(listener: &TcpListener) -> Session {
    let (stream, _) = timeout(TIMEOUT, listener.accept())
        .await
        .expect("timeout waiting for client connection")
        .expect("accept failed");
    let (read, writer) = stream.into_split();
    let (tx, lines) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut reader = BufReader::new(read);
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send((Instant::now(), buf.trim_end().to_string())).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Session { lines, writer }
}

impl Session {
    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("server write failed");
    }

    /// Next line from the client, whatever it is.
    async fn next_line(&mut self) -> (Instant, String) {
        timeout(TIMEOUT, self.lines.recv())
            .await
            .expect("timeout waiting for next line")
            .expect("connection closed")
    }

    /// Next line matching `predicate`, skipping others.
    async fn expect_line<F: Fn(&str) -> bool>(&mut self, predicate: F, desc: &str) -> (Instant, String) {
        timeout(TIMEOUT, async {
            loop {
                match self.lines.recv().await {
                    Some((at, line)) if predicate(&line) => return (at, line),
                    Some(_) => continue,
                    None => panic!("connection closed while waiting for: {desc}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timeout waiting for: {desc}"))
    }

    /// Assert that no line matching `predicate` arrives within `dur`.
    async fn expect_silence<F: Fn(&str) -> bool>(&mut self, predicate: F, dur: Duration, desc: &str) {
        let got = timeout(dur, async {
            loop {
                match self.lines.recv().await {
                    Some((_, line)) if predicate(&line) => return Some(line),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await;
        if let Ok(Some(line)) = got {
            panic!("unexpected line while expecting silence ({desc}): {line}");
        }
    }

    /// Play the server's side of registration: consume the login
    /// handshake in order, then issue the welcome numeric.
    async fn complete_registration(&mut self, nick: &str) {
        let (_, pass) = self.next_line().await;
        assert!(pass.starts_with("PASS "), "expected PASS first, got {pass}");
        let (_, user) = self.next_line().await;
        assert!(user.starts_with("USER "), "expected USER second, got {user}");
        let (_, nick_line) = self.next_line().await;
        assert_eq!(nick_line, format!("NICK {nick}"));
        self.send(&format!(":server.test 001 {nick} :welcome")).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_flushes_before_queued_commands() {
    let listener = bind_listener().await;
    let client = Client::new(
        test_config(&listener),
        Credential::new("tester", None, None),
        noop_handler(),
    );
    let handle = client.handle();
    handle.privmsg("#chan", "hello there");
    spawn_client(client);

    let mut sess = accept_session(&listener).await;
    let (_, first) = sess.next_line().await;
    assert_eq!(first, "PASS none");
    let (_, second) = sess.next_line().await;
    assert_eq!(second, "USER tester * * tester");
    let (_, third) = sess.next_line().await;
    assert_eq!(third, "NICK tester");

    // Nothing from the queue may flush before registration.
    sess.expect_silence(
        |l| l.starts_with("PRIVMSG"),
        Duration::from_millis(300),
        "no PRIVMSG before 001",
    )
    .await;

    sess.send(":server.test 001 tester :welcome").await;
    sess.expect_line(|l| l == "PRIVMSG #chan :hello there", "queued PRIVMSG")
        .await;
}

#[tokio::test]
async fn ping_gets_exactly_one_pong() {
    let listener = bind_listener().await;
    let client = Client::new(
        test_config(&listener),
        Credential::new("tester", None, None),
        noop_handler(),
    );
    spawn_client(client);

    let mut sess = accept_session(&listener).await;
    sess.complete_registration("tester").await;

    sess.send("PING :server.example").await;
    sess.expect_line(|l| l == "PONG server.example", "PONG reply").await;
    sess.expect_silence(
        |l| l.starts_with("PONG"),
        Duration::from_millis(300),
        "single PONG",
    )
    .await;
}

#[tokio::test]
async fn queued_sends_keep_minimum_spacing() {
    let listener = bind_listener().await;
    let mut config = test_config(&listener);
    config.send_spacing = Duration::from_millis(200);
    let client = Client::new(config, Credential::new("tester", None, None), noop_handler());
    let handle = client.handle();
    handle.send("ALPHA 1");
    handle.send("ALPHA 2");
    handle.send("ALPHA 3");
    spawn_client(client);

    let mut sess = accept_session(&listener).await;
    sess.complete_registration("tester").await;

    let (t1, _) = sess.expect_line(|l| l == "ALPHA 1", "first send").await;
    let (t2, _) = sess.expect_line(|l| l == "ALPHA 2", "second send").await;
    let (t3, _) = sess.expect_line(|l| l == "ALPHA 3", "third send").await;

    // Arrival jitter only ever stretches gaps at the sender's pace;
    // allow some slack below the configured spacing anyway.
    assert!(t2 - t1 >= Duration::from_millis(150), "gap was {:?}", t2 - t1);
    assert!(t3 - t2 >= Duration::from_millis(150), "gap was {:?}", t3 - t2);
}

#[tokio::test]
async fn fatal_numeric_rebuilds_connection_and_replays_membership() {
    let listener = bind_listener().await;
    let client = Client::new(
        test_config(&listener),
        Credential::new("tester", None, None),
        noop_handler(),
    );
    let handle = client.handle();
    // Joining the same channel twice must still replay once.
    handle.join("rust");
    handle.join("rust");
    spawn_client(client);

    let mut sess = accept_session(&listener).await;
    sess.complete_registration("tester").await;

    // Two queued JOINs plus one from the initial membership replay.
    for _ in 0..3 {
        sess.expect_line(|l| l == "JOIN #rust", "JOIN before reconnect").await;
    }

    // Watch for the Disconnected window while the fatal reply lands.
    let mut states = handle.state_changes();
    assert_eq!(handle.state(), ConnectionState::Registered);
    let saw_disconnect = tokio::spawn(async move {
        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .map(|_| ())
    });

    sess.send(":server.test 500 tester :internal error").await;
    timeout(TIMEOUT, saw_disconnect)
        .await
        .expect("never saw Disconnected")
        .unwrap()
        .unwrap();

    // New generation: fresh handshake, then exactly one JOIN.
    let mut sess2 = accept_session(&listener).await;
    sess2.complete_registration("tester").await;
    sess2.expect_line(|l| l == "JOIN #rust", "replayed JOIN").await;
    sess2
        .expect_silence(
            |l| l.starts_with("JOIN"),
            Duration::from_millis(400),
            "exactly one replayed JOIN",
        )
        .await;
}

#[tokio::test]
async fn parted_channel_is_not_replayed() {
    let listener = bind_listener().await;
    let client = Client::new(
        test_config(&listener),
        Credential::new("tester", None, None),
        noop_handler(),
    );
    let handle = client.handle();
    handle.join("rust");
    handle.join("news");
    handle.part("news");
    spawn_client(client);

    let mut sess = accept_session(&listener).await;
    sess.complete_registration("tester").await;

    // Drain the queued traffic: two JOINs, one PART, one replayed JOIN.
    sess.expect_line(|l| l == "JOIN #rust", "queued JOIN #rust").await;
    sess.expect_line(|l| l == "JOIN #news", "queued JOIN #news").await;
    sess.expect_line(|l| l == "PART #news", "queued PART #news").await;
    sess.expect_line(|l| l == "JOIN #rust", "initial replay JOIN").await;

    sess.send(":server.test 451 tester :you have not registered").await;

    let mut sess2 = accept_session(&listener).await;
    sess2.complete_registration("tester").await;
    sess2.expect_line(|l| l == "JOIN #rust", "replayed JOIN #rust").await;
    sess2
        .expect_silence(
            |l| l.starts_with("JOIN"),
            Duration::from_millis(400),
            "no replay for parted channel",
        )
        .await;
}

#[tokio::test]
async fn watchdog_reconnects_when_probes_go_unanswered() {
    let listener = bind_listener().await;
    let mut config = test_config(&listener);
    config.ping_interval = Duration::from_millis(100);
    config.max_awaiting_ping = 2;
    let client = Client::new(config, Credential::new("tester", None, None), noop_handler());
    spawn_client(client);

    // First connection: register, then never answer any probe.
    let mut sess = accept_session(&listener).await;
    sess.complete_registration("tester").await;
    sess.expect_line(|l| l.starts_with("PING "), "first probe").await;
    sess.expect_line(|l| l.starts_with("PING "), "second probe").await;

    // The supervisor trips the threshold and rebuilds the connection.
    let mut sess2 = accept_session(&listener).await;
    sess2.complete_registration("tester").await;

    // Answer probes on the new connection; no further reconnect may
    // happen while replies keep coming.
    tokio::spawn(async move {
        loop {
            let (_, line) = sess2.next_line().await;
            if line.starts_with("PING") {
                sess2.send("PONG :ok").await;
            }
        }
    });
    let third = timeout(Duration::from_millis(1500), listener.accept()).await;
    assert!(third.is_err(), "unexpected reconnect while probes were answered");
}

#[tokio::test]
async fn handler_failures_and_bad_lines_do_not_kill_the_dispatcher() {
    let listener = bind_listener().await;
    let seen = Arc::new(AtomicU32::new(0));
    let seen_in_handler = seen.clone();
    let handler: MessageHandler = Arc::new(move |_line| {
        let seen = seen_in_handler.clone();
        Box::pin(async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("handler exploded"))
        })
    });
    let client = Client::new(
        test_config(&listener),
        Credential::new("tester", None, None),
        handler,
    );
    spawn_client(client);

    let mut sess = accept_session(&listener).await;
    sess.complete_registration("tester").await;

    sess.send(":alice!a@host PRIVMSG #chan :one").await;
    sess.send(":alice!a@host PRIVMSG #chan :two").await;
    sess.send(": :no command in this line").await;
    sess.send("PING :still-alive").await;

    // The PONG proves the read loop survived two handler failures and
    // one unparseable line.
    sess.expect_line(|l| l == "PONG still-alive", "PONG after failures").await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
