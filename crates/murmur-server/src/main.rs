//! # murmur
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with a config file; the first of ./murmur.toml,
//! # /etc/murmur/murmur.toml and ~/.config/murmur/murmur.toml wins
//! murmur
//!
//! # Override settings from the environment
//! MURMUR__PORT=8080 MURMUR__HOST=0.0.0.0 murmur
//! ```

use anyhow::Result;
use murmur_server::{config::Config, handlers};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_server=debug,murmur_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting murmur on {}:{}", config.host, config.port);

    handlers::run_server(config).await?;

    Ok(())
}
