use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mdp_runtime::{ConfigStore, Controller};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod settings;

use settings::Settings;

#[derive(Parser, Debug)]
struct Args {
    /// Settings file (defaults to ./mdp.toml when present)
    #[arg(short, long)]
    settings: Option<String>,
    /// Address to serve the control API on
    #[arg(long)]
    listen: Option<String>,
    /// Directory holding sourceConfig.yaml and destinationConfig.yaml
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    let args = Args::parse();

    let mut settings = Settings::load(args.settings.as_deref()).context("load settings")?;
    if let Some(listen) = args.listen {
        settings.listen = listen;
    }
    if let Some(dir) = args.config_dir {
        settings.config_dir = dir;
    }

    let controller = Arc::new(Controller::new(
        ConfigStore::new(&settings.config_dir),
        settings.runtime_options(),
    )?);
    controller.restore().await;

    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("bind {}", settings.listen))?;
    info!(listen = %settings.listen, config_dir = %settings.config_dir.display(), "control API listening");

    let served = axum::serve(listener, api::router(Arc::clone(&controller)))
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "listening for ctrl-c failed");
            }
            info!("shutdown requested");
        })
        .await;

    controller.shutdown().await;
    served.context("serve control API")?;
    Ok(())
}
