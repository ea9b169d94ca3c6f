//! pvsim-monitor: print every variable update from a running server.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use pvsim::{init_logging, LogLevel};
use pvsim_core::TargetFile;
use pvsim_protocol::{
    decode_server_message, encode_client_message, ClientMessage, ServerMessage, SubscribeRequest,
    Subscription, VariableUpdate,
};

#[derive(Debug, Parser)]
#[command(name = "pvsim-monitor", version, about = "Print updates from a pvsim server")]
struct Args {
    /// Server WebSocket URL
    #[arg(long, default_value = "ws://localhost:5075")]
    url: String,

    /// Subscribe only to the channels listed in this target file
    #[arg(long)]
    targets: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "INFO", ignore_case = true)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let names: Option<Vec<String>> = match &args.targets {
        Some(path) => {
            let targets = TargetFile::load(path)?;
            Some(targets.names().map(String::from).collect())
        }
        None => None,
    };

    let url = match names {
        Some(_) => with_query(&args.url, "subscribe=none"),
        None => args.url.clone(),
    };
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    info!("Connected to {}", url);

    if let Some(names) = names {
        let subscribe = ClientMessage::Subscribe(SubscribeRequest {
            subscribe: names.into_iter().map(|name| Subscription { name }).collect(),
        });
        ws_tx.send(Message::Text(encode_client_message(&subscribe)?)).await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, closing connection");
                ws_tx.send(Message::Close(None)).await.ok();
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match decode_server_message(&text) {
                    Ok(ServerMessage::Update(update)) => println!("{}", format_update(&update)),
                    Ok(ServerMessage::Hello(hello)) => {
                        info!("Server {} {} serves {} variables", hello.name, hello.version, hello.variables);
                    }
                    Ok(ServerMessage::Response(response)) => debug!("Response: {:?}", response),
                    Err(e) => warn!("Ignoring message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Server closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("WebSocket error"),
            }
        }
    }

    Ok(())
}

fn with_query(url: &str, query: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

fn format_update(update: &VariableUpdate) -> String {
    let stamp = &update.variable.time_stamp;
    format!(
        "{} | {} | {}.{:09}",
        update.name, update.variable.value, stamp.seconds_past_epoch, stamp.nanoseconds
    )
}
