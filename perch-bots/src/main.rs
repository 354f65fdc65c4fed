//! perch-listen: minimal chat listener.
//!
//! Connects to an IRC server, joins the given channels, and prints
//! every line the server sends. The connection engine handles
//! keepalive, reconnects, and channel replay; this binary is just the
//! message handler.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use perch_sdk::{Client, ClientConfig, Credential, MessageHandler};

#[derive(Parser)]
#[command(name = "perch-listen", about = "Print every message from an IRC server")]
struct Args {
    /// Server hostname
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(long, default_value_t = 6667)]
    port: u16,

    /// Login name
    #[arg(long)]
    name: String,

    /// Server password
    #[arg(long)]
    password: Option<String>,

    /// Nickname (defaults to the login name)
    #[arg(long)]
    nick: Option<String>,

    /// Use TLS
    #[arg(long)]
    secured: bool,

    /// Channels to join
    channels: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perch_sdk=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ClientConfig {
        server: args.server,
        port: args.port,
        secured: args.secured,
        ..ClientConfig::default()
    };
    let credential = Credential::new(args.name, args.password, args.nick);

    let handler: MessageHandler = Arc::new(|line| {
        Box::pin(async move {
            println!("->> {line}");
            Ok(())
        })
    });

    let client = Client::new(config, credential, handler);
    let handle = client.handle();
    for channel in &args.channels {
        handle.join(channel);
    }

    tracing::info!("Listener running. Ctrl+C to stop.");
    client.run().await?;
    Ok(())
}
