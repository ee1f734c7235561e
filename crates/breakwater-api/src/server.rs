//! HTTP server setup and request routing.
//!
//! Wires the webhook endpoint, health probes, and circuit stats into an
//! Axum router with tracing, timeout enforcement, and request-id
//! propagation, and serves it with graceful shutdown on SIGINT/SIGTERM.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use breakwater_core::Clock;
use breakwater_guard::BreakerRegistry;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config, handlers, idempotency::IdempotencyStore, processor::EventProcessor,
    store::WebhookStore,
};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<Config>,
    /// Durable store for events, payments, and bookings.
    pub store: Arc<dyn WebhookStore>,
    /// Two-tier idempotency lookup.
    pub idempotency: IdempotencyStore,
    /// Event-type dispatcher.
    pub processor: Arc<EventProcessor>,
    /// Outbound circuit breaker registry (exposed via `/stats/circuits`).
    pub registry: Arc<BreakerRegistry>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Builds application state, constructing the idempotency store and
    /// event processor over the given durable store.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn WebhookStore>,
        registry: Arc<BreakerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let idempotency = IdempotencyStore::new(
            store.clone(),
            config.idempotency_cache_capacity,
            config.idempotency_ttl(),
        );
        let processor = Arc::new(EventProcessor::new(store.clone(), clock.clone()));

        Self { config, store, idempotency, processor, registry, clock }
    }
}

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/stats/circuits", get(handlers::circuit_stats));

    let webhook_routes =
        Router::new().route("/webhooks/{provider}", post(handlers::receive_webhook));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware injecting an `X-Request-Id` header for cross-service
/// tracing.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// # Errors
///
/// Returns `std::io::Error` if the port is already in use or the network
/// interface is unavailable.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("waiting for in-flight requests to complete");
}
