//! Error types surfaced by the client engine.

use thiserror::Error;

/// Why a received protocol line could not be parsed.
///
/// The dispatcher logs and drops unparseable lines; a parse failure
/// never terminates the read loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The mandatory command token is missing or empty.
    #[error("line has no command token")]
    MissingCommand,
}

/// Startup errors reported to the embedding application.
///
/// Everything else (transport failures, fatal server replies) is
/// absorbed by the reconnect state machine; these are the only
/// conditions expected to terminate the process.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured server address did not resolve.
    #[error("cannot resolve server address {addr}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The configured host is not a valid TLS server name.
    #[error("invalid TLS server name {host:?}")]
    ServerName { host: String },
}
