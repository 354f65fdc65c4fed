//! Resilient IRC client engine.
//!
//! Maintains a single long-lived connection to one server and keeps it
//! alive across transient failures. Four cooperating loops share the
//! transport: the inbound dispatcher (reads lines, answers PING/PONG
//! and registration, forwards the rest to the application's message
//! handler), the rate-limited outbound writer, the keepalive pulse, and
//! the reconnect supervisor.
//!
//! ## Reconnection
//!
//! Connect retries run forever on a fixed interval, with no backoff
//! and no jitter. A reconnect retires the previous generation's loops,
//! redoes the login handshake, and replays channel membership, so the
//! application only ever talks to one logical connection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use perch_sdk::{Client, ClientConfig, Credential, MessageHandler};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig {
//!     server: "irc.example.net".to_string(),
//!     ..ClientConfig::default()
//! };
//! let credential = Credential::new("reader", None, None);
//! let handler: MessageHandler = Arc::new(|line| {
//!     Box::pin(async move {
//!         println!("{line}");
//!         Ok(())
//!     })
//! });
//!
//! let client = Client::new(config, credential, handler);
//! let handle = client.handle();
//! handle.join("rust");
//! client.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod dispatcher;
pub mod error;
pub mod message;
mod outbound;
mod state;
mod transport;
mod watchdog;

pub use client::{Client, ClientHandle, ConnectHook, HandlerFuture, MessageHandler};
pub use config::{ClientConfig, Credential};
pub use error::{ClientError, ParseError};
pub use message::{Message, Prefix, format_line};
pub use state::ConnectionState;
