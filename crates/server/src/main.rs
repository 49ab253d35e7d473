mod bootstrap;
mod health;
mod routes;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use foodlink_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::BootstrapOptions;

#[derive(Debug, Parser)]
#[command(
    name = "foodlink-server",
    about = "FoodLink assistant HTTP service",
    long_about = "Serve the agent router, conversational chat and donation parsing over HTTP.",
    after_help = "Examples:\n  foodlink-server --config foodlink.toml\n  foodlink-server --seed --port 8080"
)]
struct Cli {
    #[arg(long, help = "Path to a TOML config file (defaults to foodlink.toml if present)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, help = "Override server.port")]
    port: Option<u16>,
    #[arg(long, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, help = "Override llm.provider (openai|ollama)")]
    llm_provider: Option<LlmProvider>,
    #[arg(long, help = "Override llm.model")]
    llm_model: Option<String>,
    #[arg(long, help = "Override llm.base_url")]
    llm_base_url: Option<String>,
    #[arg(long, help = "Load the deterministic demo users and partners on startup")]
    seed: bool,
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                llm_provider: self.llm_provider,
                llm_model: self.llm_model.clone(),
                llm_base_url: self.llm_base_url.clone(),
                server_port: self.port,
                ..ConfigOverrides::default()
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use foodlink_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    // Logging depends on the loaded config, so load it before anything else.
    let config = AppConfig::load(cli.load_options())?;
    init_logging(&config);

    let options = BootstrapOptions { seed_demo_data: cli.seed };
    let app = bootstrap::bootstrap_with_config(config, options).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let service = routes::router(app.state.clone())
        .merge(health::router(app.db_pool.clone(), app.llm.clone()));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "foodlink-server listening"
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "foodlink-server stopping"
    );
    let _ = stop_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the shutdown deadline"
        ),
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
