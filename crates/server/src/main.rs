//! Pinbox server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pinbox_core::config::AppConfig;
use pinbox_server::sweeper::{Sweeper, spawn_sweep_task};
use pinbox_server::{AppState, create_router};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENV_PREFIX: &str = "PINBOX_";
const CONFIG_ENV: &str = "PINBOX_CONFIG";

/// Pinbox - wallet-identified file uploads
#[derive(Parser, Debug)]
#[command(name = "pinboxd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PINBOX_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `PINBOX_` variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // PINBOX_CONFIG only names the file.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with(ENV_PREFIX) && key != CONFIG_ENV);

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided. Either:\n\
             1. Create a config file at {path}\n\
             2. Set environment variables: PINBOX_SERVER__BIND=0.0.0.0:8080 \
             PINBOX_QUOTA__FREE_TIER_BYTES=1073741824 pinboxd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set PINBOX_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Pinbox v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    pinbox_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let staging = pinbox_storage::staging_from_config(&config.staging)
        .await
        .context("failed to initialize staging area")?;
    tracing::info!("Staging area initialized");

    let content = pinbox_storage::content_from_config(&config.content)
        .await
        .context("failed to initialize content store")?;
    tracing::info!(backend = content.backend_name(), "Content store initialized");

    let metadata = pinbox_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let state = AppState::new(config, staging, content, metadata);

    // Refuse to serve with an unreachable store.
    state
        .health_check()
        .await
        .map_err(|e| anyhow::anyhow!("store health check failed: {e}"))?;
    tracing::info!("Store connectivity verified");

    if state.config.sweep.enabled {
        let interval = state.config.sweep.interval();
        spawn_sweep_task(Sweeper::from_state(&state), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            staging_max_age_secs = state.config.sweep.staging_max_age_secs,
            "Sweep task spawned"
        );
    }

    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
