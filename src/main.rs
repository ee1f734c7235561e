//! Breakwater resilience middleware service.
//!
//! Main entry point: initializes tracing, loads configuration, connects
//! to PostgreSQL, runs migrations, and serves the webhook endpoint until
//! a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use breakwater_api::{AppState, Config, PostgresWebhookStore};
use breakwater_core::{storage::Storage, RealClock};
use breakwater_guard::{BreakerRegistry, TracingSink};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log);
    info!("starting Breakwater resilience middleware");

    let server_addr = config.server_addr()?;
    info!(
        %server_addr,
        max_connections = config.database_max_connections,
        providers = config.providers.len(),
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&db_pool).await?;
    info!("database migrations completed");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store = Arc::new(PostgresWebhookStore::new(storage));
    let clock = Arc::new(RealClock::new());

    // One registry for the process lifetime; business-logic collaborators
    // reach it through AppState, and /stats/circuits exposes snapshots.
    let registry = Arc::new(BreakerRegistry::new(
        config.outbound_defaults(),
        config.outbound_overrides(),
        clock.clone(),
        Arc::new(TracingSink),
    ));

    let state = AppState::new(Arc::new(config), store, registry, clock);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = breakwater_api::start_server(state, server_addr).await {
            error!(error = %e, "server failed");
        }
    });

    info!(addr = %server_addr, "Breakwater is ready to receive webhooks");

    server_handle.await.context("server task panicked")?;

    db_pool.close().await;
    info!("database connections closed, shutdown complete");

    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with startup retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs idempotent schema migrations.
///
/// The unique indexes on `idempotency_key` are load-bearing: they are the
/// sole arbitration mechanism for concurrent duplicate deliveries.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id UUID PRIMARY KEY,
            provider TEXT NOT NULL,
            event_type TEXT NOT NULL,
            source_event_id TEXT NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            payload BYTEA NOT NULL,
            signature TEXT NOT NULL,
            processed_at TIMESTAMPTZ,
            processing_error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_events table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookings (
            id UUID PRIMARY KEY,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create bookings table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_transactions (
            id UUID PRIMARY KEY,
            provider TEXT NOT NULL,
            external_id TEXT NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            amount_cents BIGINT NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            booking_id UUID REFERENCES bookings(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(provider, external_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create payment_transactions table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_provider
        ON webhook_events(provider, created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_events provider index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_payment_transactions_booking
        ON payment_transactions(booking_id)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create payment_transactions booking index")?;

    Ok(())
}
