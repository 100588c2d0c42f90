use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rust_fanout_sender::config;
use rust_fanout_sender::{Message, MessageSender};

const USAGE: &str = "usage: fanout-send [--init-config PATH] [EXCHANGE] [MESSAGE...]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("--help") | Some("-h") => {
            println!("{}", USAGE);
            return Ok(());
        }
        Some("--init-config") => {
            let path = args
                .get(1)
                .map(String::as_str)
                .unwrap_or(config::CONFIG_FILE_NAME);
            config::create_default_config_file(Path::new(path))?;
            println!("Configuration file created at: {}", path);
            return Ok(());
        }
        _ => {}
    }

    let mut settings = config::load_config().context("Failed to load sender configuration")?;
    if !args.is_empty() {
        settings.exchange.name = args.remove(0);
    }

    let connector = Arc::new(settings.connection_manager());
    let mut sender = MessageSender::new(connector, &settings.exchange.name);
    sender.set_transactional(settings.exchange.transactional);
    sender.add_message_sent_listener(Arc::new(|message: &Message| {
        info!(message_id = %message.id, bytes = message.payload.len(), "Message sent");
    }));

    sender.start().await?;

    let published = if args.is_empty() {
        tokio::select! {
            result = publish_stdin(&sender) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                Ok(())
            }
        }
    } else {
        publish_all(&sender, &args).await
    };

    if let Err(e) = &published {
        error!("Publishing stopped: {}", e);
    }

    sender.stop().await?;
    published
}

async fn publish_all(sender: &MessageSender, messages: &[String]) -> Result<()> {
    for text in messages {
        let message = sender.create_message().with_payload(text.as_bytes());
        sender.send(message).await?;
    }
    Ok(())
}

async fn publish_stdin(sender: &MessageSender) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message = sender
            .create_message()
            .with_payload(line.into_bytes())
            .with_content_type("text/plain");
        sender.send(message).await?;
    }
    Ok(())
}
