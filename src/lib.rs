//! Discount eligibility and payment settlement for the game store.

pub mod api;
pub mod catalog;
pub mod channels;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod discount;
pub mod doku;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod notify;
pub mod reconcile;
pub mod responses;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, init_router};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::catalog::PgCatalog;
use crate::checkout::Checkout;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::doku::DokuClient;
use crate::gateway::PaymentGateway;
use crate::ledger::PgLedger;
use crate::notify::PgNotifier;
use crate::reconcile::Reconciler;

/// Initializes the database pool.
pub async fn init_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}

/// Applies the schema migrations in `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    Ok(())
}

/// Wires the Postgres-backed services and the DOKU client into the app state.
pub fn build_state(config: &Config, pool: PgPool) -> Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::from_offset_minutes(config.utc_offset_minutes));
    let doku = Arc::new(DokuClient::new(config.doku()).context("Failed to build DOKU client")?);
    let gateway: Arc<dyn PaymentGateway> = doku.clone();
    let ledger = Arc::new(PgLedger::new(pool.clone()));

    let checkout = Checkout::new(
        Arc::new(PgCatalog::new(pool.clone())),
        ledger.clone(),
        gateway.clone(),
        clock.clone(),
        config.checkout_policy(),
    );
    let reconciler = Reconciler::new(ledger, gateway, Arc::new(PgNotifier::new(pool)), clock);

    Ok(AppState {
        checkout: Arc::new(checkout),
        reconciler: Arc::new(reconciler),
        notification_verifier: config.doku_verify_notifications.then_some(doku),
        sweep_token: config.sweep_token.clone().filter(|t| !t.is_empty()),
    })
}

/// Runs the expiry sweep every `every` until the runtime shuts down.
pub fn spawn_expiry_sweeper(reconciler: Arc<Reconciler>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.sweep_expired().await {
                warn!(error = %e, "expiry sweep failed");
            }
        }
    })
}
