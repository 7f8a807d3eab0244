use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use madmin_api::{AppState, ServerConfig};
use madmin_store::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref()).wrap_err("failed to load server configuration")?;

    let registry = Arc::new(
        Registry::open(config.registry.clone())
            .await
            .wrap_err("failed to open registry")?,
    );

    if config.admin_token.is_none() {
        warn!("No admin token configured, review and rebuild endpoints are open");
    }

    let interval = Duration::from_secs(config.registry.rebuild_interval_secs);
    let scheduler = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.rebuild().await;
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .wrap_err_with(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %listener.local_addr()?, "Registry server listening");

    let state = AppState::new(registry, config.admin_token.clone());
    madmin_api::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await?;

    scheduler.abort();
    Ok(())
}
