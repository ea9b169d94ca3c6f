//! pvsim: serve simulated channels found in an instrument tree.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};

use pvsim::{init_logging, LogLevel};
use pvsim_core::build_config;
use pvsim_providers::{variable_tasks, DeviceRegistry, PeriodicTask, VariableClient, VariableDriver};
use pvsim_server::{ServerConfig, VariableServer};

#[derive(Debug, Parser)]
#[command(name = "pvsim", version, about = "Serve simulated channels from an instrument tree")]
struct Args {
    /// Instrument tree (JSON)
    #[arg(short, long)]
    json: PathBuf,

    /// Target file holding per-channel simulation parameters; created if missing
    #[arg(short, long)]
    target_path: PathBuf,

    /// Server configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "INFO", ignore_case = true)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    info!("pvsim starting...");

    let text = fs::read_to_string(&args.json)
        .with_context(|| format!("Failed to read {}", args.json.display()))?;
    let tree: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", args.json.display()))?;

    let specs = build_config(&tree);
    let registry = DeviceRegistry::from_specs(&specs);

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    config.target_path = Some(args.target_path.clone());
    let update_period = config.update_period;

    let server = VariableServer::build(config, &registry).context("Failed to build variable server")?;
    let client: Arc<dyn VariableClient> = Arc::new(server.client());
    let mut tasks = variable_tasks(&registry, server.targets(), client, update_period);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server_handle = tokio::spawn(server.run(async move {
        let _ = shutdown_rx.await;
    }));

    for task in &mut tasks {
        task.start()?;
    }
    info!("Started {} update tasks", tasks.len());

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            None
        }
        result = &mut server_handle => {
            warn!("Variable server stopped");
            Some(result)
        }
    };

    tokio::task::spawn_blocking(move || stop_all(tasks)).await?;

    let result = match finished {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(());
            server_handle.await
        }
    };
    result?.context("Variable server failed")?;

    info!("Shutdown complete");
    Ok(())
}

fn stop_all(tasks: Vec<PeriodicTask<VariableDriver>>) {
    for mut task in tasks {
        if let Err(e) = task.stop() {
            warn!("Task {} ended with an error: {}", task.name(), e);
        }
    }
}
