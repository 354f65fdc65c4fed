//! twitch-listen: anonymous Twitch chat listener.
//!
//! Twitch's IRC interface accepts `justinfan*` nicks without real
//! credentials for read-only access. Its capability requests are plain
//! handshake extensions, so they go out through the post-handshake
//! hook, before channel replay.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use perch_sdk::{Client, ClientConfig, ConnectHook, Credential, Message, MessageHandler};

#[derive(Parser)]
#[command(name = "twitch-listen", about = "Print chat from Twitch channels")]
struct Args {
    /// Anonymous login name
    #[arg(long, default_value = "justinfan123")]
    name: String,

    /// Channels to watch
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
        server: "irc.twitch.tv".to_string(),
        port: 6667,
        ..ClientConfig::default()
    };
    // Twitch ignores the password for anonymous nicks but requires one.
    let credential = Credential::new(args.name, Some("blah".to_string()), None);

    let handler: MessageHandler = Arc::new(|line| {
        Box::pin(async move {
            if let Ok(msg) = Message::parse(&line)
                && msg.command == "PRIVMSG"
            {
                let nick = msg.prefix.as_ref().map(|p| p.nick.as_str()).unwrap_or("?");
                let text = msg.trailing.as_deref().unwrap_or_default();
                println!("{nick} >> {text}");
            }
            Ok(())
        })
    });

    let caps: ConnectHook = Arc::new(|| {
        vec![
            "CAP REQ :twitch.tv/membership".to_string(),
            "CAP REQ :twitch.tv/tags".to_string(),
            "CAP REQ :twitch.tv/commands".to_string(),
        ]
    });

    let client = Client::new(config, credential, handler).on_connect(caps);
    let handle = client.handle();
    for channel in &args.channels {
        handle.join(channel);
    }

    tracing::info!("Twitch listener running. Ctrl+C to stop.");
    client.run().await?;
    Ok(())
}
