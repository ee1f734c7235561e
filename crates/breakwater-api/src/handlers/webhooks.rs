//! Inbound webhook endpoint.
//!
//! Orchestrates the full inbound pipeline: verify → deduplicate →
//! persist → dispatch → record outcome → respond. Signature and
//! malformed-body failures are resolved entirely here and never reach
//! the event processor. Processing failures surface as 500 so the
//! provider's own retry mechanism re-delivers; the unique idempotency
//! key makes those redeliveries safe.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use breakwater_core::models::{EventId, WebhookEventRecord};
use breakwater_core::storage::InsertOutcome;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::{crypto, event::PaymentEvent, server::AppState};

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
}

/// Receives a webhook from a payment provider.
///
/// # Responses
///
/// - `200` processed, already-processed, or abandoned (body distinguishes)
/// - `400` malformed body
/// - `401` signature invalid/missing, or provider not configured
/// - `500` processing or persistence failure; the sender should retry
#[instrument(
    name = "receive_webhook",
    skip(state, headers, body),
    fields(provider = %provider, body_len = body.len())
)]
pub async fn receive_webhook(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Fail closed: a provider without a configured secret cannot be
    // verified, so its deliveries are rejected outright.
    let Some(provider_config) = state.config.provider(&provider) else {
        warn!("webhook from unconfigured provider rejected");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "signature_invalid",
            "no webhook secret configured for provider",
        );
    };

    let signature = headers
        .get(provider_config.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // Verification runs over the raw body bytes; any re-serialized form
    // could differ byte-for-byte and void a legitimate signature.
    if let Err(e) = crypto::verify_signature(&body, &signature, &provider_config.signing_secret) {
        warn!(error = %e, "webhook signature rejected");
        return error_response(StatusCode::UNAUTHORIZED, "signature_invalid", e.to_string());
    }

    let event = match PaymentEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "malformed webhook body");
            return error_response(StatusCode::BAD_REQUEST, "malformed_payload", e.to_string());
        },
    };

    let idempotency_key = format!("{provider}_{}", event.id);

    match state.idempotency.get(&idempotency_key).await {
        Ok(Some(prior)) => {
            info!(%idempotency_key, "duplicate delivery, returning prior result");
            return (StatusCode::OK, Json(prior)).into_response();
        },
        Ok(None) => {},
        Err(e) => {
            error!(error = %e, "idempotency lookup failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_error",
                "idempotency lookup failed",
            );
        },
    }

    let record = WebhookEventRecord::new(
        provider.clone(),
        event.event_type.clone(),
        event.id.clone(),
        body.to_vec(),
        signature,
        DateTime::<Utc>::from(state.clock.now_system()),
    );
    let event_id = record.id;

    match state.store.insert_event(record).await {
        Ok(InsertOutcome::Inserted) => {
            debug!(%event_id, "event persisted, dispatching");
            dispatch_event(&state, &provider, &idempotency_key, &event, event_id).await
        },
        Ok(InsertOutcome::Duplicate) => {
            resolve_duplicate(&state, &provider, &idempotency_key, &event).await
        },
        Err(e) => {
            error!(error = %e, "failed to persist webhook event");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_error",
                "failed to persist event",
            )
        },
    }
}

/// Runs the handler for an event this request owns, stamping the outcome.
async fn dispatch_event(
    state: &AppState,
    provider: &str,
    idempotency_key: &str,
    event: &PaymentEvent,
    event_id: EventId,
) -> Response {
    match state.processor.dispatch(provider, idempotency_key, event).await {
        Ok(response) => {
            let now = DateTime::<Utc>::from(state.clock.now_system());
            if let Err(e) = state.store.mark_event_processed(event_id, now).await {
                // The side effect committed idempotently; mark the run
                // failed so the redelivery re-dispatches, hits the
                // duplicate payment key, and retries only this stamp.
                error!(error = %e, %event_id, "failed to stamp processed event");
                let _ = state
                    .store
                    .record_event_failure(event_id, "failed to record processing outcome".to_string())
                    .await;
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "persistence_error",
                    "failed to record processing outcome",
                );
            }

            state.idempotency.record(idempotency_key, response.clone()).await;
            info!(%event_id, event_type = %event.event_type, "event processed");
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => {
            warn!(error = %e, %event_id, "event processing failed");
            match state.store.record_event_failure(event_id, e.to_string()).await {
                Ok(retry_count) if retry_count >= state.config.max_event_retries => {
                    error!(
                        %event_id,
                        retry_count,
                        "abandoning permanently failing event"
                    );
                    let response = json!({"status": "abandoned", "event_id": event_id});
                    (StatusCode::OK, Json(response)).into_response()
                },
                Ok(retry_count) => {
                    debug!(%event_id, retry_count, "awaiting sender redelivery");
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "processing_failed",
                        e.to_string(),
                    )
                },
                Err(persist_err) => {
                    error!(error = %persist_err, %event_id, "failed to record processing failure");
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "persistence_error",
                        "failed to record processing failure",
                    )
                },
            }
        },
    }
}

/// Resolves a delivery that lost the insert race or re-delivers a known
/// event.
///
/// The existing row is authoritative:
/// - processed: return the prior outcome
/// - retry budget exhausted: acknowledge as abandoned so the sender stops
/// - failed earlier: this redelivery re-runs processing on the same row
/// - otherwise: another request is processing it right now
async fn resolve_duplicate(
    state: &AppState,
    provider: &str,
    idempotency_key: &str,
    event: &PaymentEvent,
) -> Response {
    let existing = match state.store.find_event_by_key(idempotency_key.to_string()).await {
        Ok(Some(existing)) => existing,
        Ok(None) => {
            // Insert conflicted but the row is not visible yet; let the
            // sender retry once the winner's transaction lands.
            warn!(%idempotency_key, "duplicate insert raced an uncommitted row");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_error",
                "event is being recorded, retry shortly",
            );
        },
        Err(e) => {
            error!(error = %e, "failed to load duplicate event");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_error",
                "failed to load existing event",
            );
        },
    };

    if existing.processed_at.is_some() {
        let response = json!({"status": "already_processed", "event_id": existing.id});
        state.idempotency.record(idempotency_key, response.clone()).await;
        info!(event_id = %existing.id, "delivery for already-processed event");
        return (StatusCode::OK, Json(response)).into_response();
    }

    if existing.retry_count >= state.config.max_event_retries {
        info!(event_id = %existing.id, "delivery for abandoned event");
        let response = json!({"status": "abandoned", "event_id": existing.id});
        return (StatusCode::OK, Json(response)).into_response();
    }

    if existing.processing_error.is_some() {
        info!(event_id = %existing.id, "redelivery of failed event, re-dispatching");
        return dispatch_event(state, provider, idempotency_key, event, existing.id).await;
    }

    // A concurrent request holds first-processing rights; its side effect
    // is the only one that can commit, so this delivery is acknowledged.
    info!(event_id = %existing.id, "concurrent duplicate delivery acknowledged");
    let response = json!({"status": "already_processed", "event_id": existing.id});
    (StatusCode::OK, Json(response)).into_response()
}

/// Creates a standardized error response.
fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorResponse { error: ErrorDetail { code, message: message.into() } };

    (status, Json(body)).into_response()
}
