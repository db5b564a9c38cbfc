use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use game_checkout::config::Config;
use game_checkout::{build_state, init_pool, init_router, run_migrations, spawn_expiry_sweeper};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = init_pool(&config).await?;
    run_migrations(&pool).await?;

    let state = build_state(&config, pool)?;
    if config.sweep_interval_secs > 0 {
        spawn_expiry_sweeper(
            state.reconciler.clone(),
            Duration::from_secs(config.sweep_interval_secs),
        );
    }

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;
    let app = init_router(state);

    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
