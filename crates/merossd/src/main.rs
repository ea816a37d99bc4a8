use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use merossd::{Config, Engine};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(version, about = "Meross radiator valve daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "merossd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter())
        .init();

    tracing::info!("merossd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config)?;
    let engine = Arc::new(engine);

    // Start the HTTP API if enabled
    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = match &config.integrations.api {
        Some(api) if api.enabled => {
            let listen = api.listen.clone();
            let port = api.port;
            let engine = engine.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = merossd::api::serve(listen, port, engine, api_shutdown_rx).await {
                    tracing::error!("HTTP API server error: {}", e);
                }
            }))
        }
        _ => None,
    };

    tokio::select! {
        result = engine.run() => {
            if let Err(e) = result {
                tracing::error!("Engine error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = api_shutdown_tx.send(());
    if let Some(task) = api_task {
        task.await?;
    }

    tracing::info!("merossd stopped");
    Ok(())
}
