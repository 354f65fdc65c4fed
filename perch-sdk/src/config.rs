//! Login credential and engine tunables.

use std::time::Duration;

/// Login credential sent during the connection handshake.
///
/// Immutable after construction; owned by the connection manager.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Account name, used in the `USER` line.
    pub name: String,
    /// Server password, sent in the `PASS` line.
    pub password: String,
    /// Nickname, sent in the `NICK` line.
    pub nick: String,
}

impl Credential {
    /// `password` falls back to the `"none"` sentinel accepted by
    /// servers that ignore `PASS`; `nick` falls back to `name`.
    pub fn new(name: impl Into<String>, password: Option<String>, nick: Option<String>) -> Self {
        let name = name.into();
        let nick = nick.unwrap_or_else(|| name.clone());
        Self {
            name,
            password: password.unwrap_or_else(|| "none".to_string()),
            nick,
        }
    }
}

/// Configuration for the connection engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname.
    pub server: String,
    /// Server port.
    pub port: u16,
    /// Use a TLS transport.
    pub secured: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub danger_accept_invalid_certs: bool,
    /// Host named in keepalive probes. Defaults to `server`.
    pub keepalive_target: Option<String>,
    /// Delay between keepalive probes.
    pub ping_interval: Duration,
    /// Unanswered probes tolerated before the connection is declared
    /// dead and rebuilt.
    pub max_awaiting_ping: u32,
    /// Minimum spacing between queued outbound sends.
    pub send_spacing: Duration,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Fixed delay between failed connect attempts.
    pub retry_delay: Duration,
    /// Grace period after the handshake before the read loop starts.
    pub settle_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: 6667,
            secured: false,
            danger_accept_invalid_certs: false,
            keepalive_target: None,
            ping_interval: Duration::from_secs(30),
            max_awaiting_ping: 3,
            send_spacing: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Host to name in `PING` probes.
    pub(crate) fn ping_host(&self) -> &str {
        self.keepalive_target.as_deref().unwrap_or(&self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_defaults() {
        let cred = Credential::new("reader", None, None);
        assert_eq!(cred.name, "reader");
        assert_eq!(cred.password, "none");
        assert_eq!(cred.nick, "reader");

        let cred = Credential::new("reader", Some("hunter2".into()), Some("lurker".into()));
        assert_eq!(cred.password, "hunter2");
        assert_eq!(cred.nick, "lurker");
    }

    #[test]
    fn keepalive_target_falls_back_to_server() {
        let mut config = ClientConfig {
            server: "irc.example.net".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(config.ping_host(), "irc.example.net");

        config.keepalive_target = Some("tmi.example.net".to_string());
        assert_eq!(config.ping_host(), "tmi.example.net");
    }

    #[test]
    fn default_watchdog_settings() {
        let config = ClientConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.max_awaiting_ping, 3);
        assert_eq!(config.send_spacing, Duration::from_millis(500));
    }
}
