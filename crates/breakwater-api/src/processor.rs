//! Event-type dispatch and side-effect handlers.
//!
//! The processor maps a verified event's type string to a registered
//! handler. Unknown types are acknowledged as a no-op, since providers emit
//! many event kinds a consumer never acts on, and acknowledging them
//! stops pointless redelivery. Handlers that mutate business state do so
//! through the store's atomic operations, so a side effect and its
//! dependent booking update commit or roll back together.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use breakwater_core::{
    error::CoreError,
    models::{BookingId, BookingPaymentState, PaymentStatus, PaymentTransaction, TransactionId},
    Clock,
};
use breakwater_core::storage::PaymentOutcome;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{event::PaymentEvent, store::WebhookStore};

/// Errors from dispatching an event to its handler.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The event object lacked fields the handler requires.
    #[error("malformed event object: {0}")]
    Malformed(String),

    /// The side-effect transaction could not commit.
    #[error("persistence failure: {0}")]
    Persistence(#[from] CoreError),
}

/// Context passed to every handler invocation.
pub struct ProcessContext {
    /// Store used for atomic side effects.
    pub store: Arc<dyn WebhookStore>,
    /// Provider that sent the event.
    pub provider: String,
    /// The event's idempotency key, mirrored onto side-effect rows.
    pub idempotency_key: String,
    /// Timestamp for rows created by this run.
    pub now: DateTime<Utc>,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ProcessError>> + Send>>;

/// Handler invoked for one event type.
pub type Handler = Arc<dyn Fn(ProcessContext, PaymentEvent) -> HandlerFuture + Send + Sync>;

/// Routes verified events to their side-effect handlers.
pub struct EventProcessor {
    store: Arc<dyn WebhookStore>,
    clock: Arc<dyn Clock>,
    handlers: HashMap<String, Handler>,
}

impl EventProcessor {
    /// Creates a processor with the built-in payment handlers registered.
    pub fn new(store: Arc<dyn WebhookStore>, clock: Arc<dyn Clock>) -> Self {
        let mut processor = Self { store, clock, handlers: HashMap::new() };

        processor.register("payment.succeeded", Arc::new(|ctx, event| {
            Box::pin(handle_payment_succeeded(ctx, event))
        }));
        processor.register("payment.failed", Arc::new(|ctx, event| {
            Box::pin(handle_payment_failed(ctx, event))
        }));
        processor.register("payment.refunded", Arc::new(|ctx, event| {
            Box::pin(handle_payment_refunded(ctx, event))
        }));

        processor
    }

    /// Registers (or replaces) the handler for an event type.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Handler) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Dispatches an event to its handler.
    ///
    /// Unknown event types return an `ignored` acknowledgement without
    /// touching any state.
    ///
    /// # Errors
    ///
    /// Propagates the handler's [`ProcessError`]; the endpoint converts
    /// it into a retryable response for the sender.
    pub async fn dispatch(
        &self,
        provider: &str,
        idempotency_key: &str,
        event: &PaymentEvent,
    ) -> Result<Value, ProcessError> {
        let Some(handler) = self.handlers.get(&event.event_type) else {
            tracing::debug!(
                provider,
                event_type = %event.event_type,
                "no handler registered, acknowledging as no-op"
            );
            return Ok(json!({"status": "ignored", "event_type": event.event_type}));
        };

        let ctx = ProcessContext {
            store: self.store.clone(),
            provider: provider.to_string(),
            idempotency_key: idempotency_key.to_string(),
            now: DateTime::<Utc>::from(self.clock.now_system()),
        };

        handler(ctx, event.clone()).await
    }
}

async fn handle_payment_succeeded(
    ctx: ProcessContext,
    event: PaymentEvent,
) -> Result<Value, ProcessError> {
    let details = event.payment().map_err(|e| ProcessError::Malformed(e.to_string()))?;
    let external_id = details.id.unwrap_or_else(|| event.id.clone());
    let booking_id = details.metadata.booking_id.map(BookingId::from);

    let payment = PaymentTransaction {
        id: TransactionId::new(),
        provider: ctx.provider.clone(),
        external_id: external_id.clone(),
        idempotency_key: ctx.idempotency_key.clone(),
        amount_cents: details.amount,
        currency: details.currency,
        status: PaymentStatus::Succeeded,
        booking_id,
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    let transaction_id = payment.id;

    let outcome = ctx.store.record_payment(payment).await?;
    if outcome == PaymentOutcome::AlreadyRecorded {
        tracing::info!(
            %external_id,
            idempotency_key = %ctx.idempotency_key,
            "payment already recorded, skipping side effects"
        );
    } else {
        tracing::info!(
            %external_id,
            amount_cents = details.amount,
            booking_id = ?booking_id,
            "payment recorded"
        );
    }

    Ok(json!({
        "status": "processed",
        "transaction_id": transaction_id,
        "booking_id": booking_id,
    }))
}

async fn handle_payment_failed(
    ctx: ProcessContext,
    event: PaymentEvent,
) -> Result<Value, ProcessError> {
    let details = event.payment().map_err(|e| ProcessError::Malformed(e.to_string()))?;
    let booking_id = details.metadata.booking_id.map(BookingId::from);

    if let Some(booking_id) = booking_id {
        ctx.store
            .set_booking_payment_state(booking_id, BookingPaymentState::Failed)
            .await?;
    }

    tracing::info!(event_id = %event.id, booking_id = ?booking_id, "payment failed");

    Ok(json!({"status": "processed", "booking_id": booking_id}))
}

async fn handle_payment_refunded(
    ctx: ProcessContext,
    event: PaymentEvent,
) -> Result<Value, ProcessError> {
    let details = event.payment().map_err(|e| ProcessError::Malformed(e.to_string()))?;
    let external_id = details.id.unwrap_or_else(|| event.id.clone());

    // Fails with NotFound if the refund arrives before the payment event;
    // the resulting 500 makes the provider redeliver after the payment
    // has landed.
    ctx.store.record_refund(ctx.provider.clone(), external_id.clone()).await?;

    tracing::info!(%external_id, "payment refunded");

    Ok(json!({"status": "processed"}))
}

#[cfg(test)]
mod tests {
    use breakwater_core::RealClock;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::store::mock::MockWebhookStore;

    fn processor_with_store() -> (Arc<MockWebhookStore>, EventProcessor) {
        let store = Arc::new(MockWebhookStore::new());
        let processor = EventProcessor::new(store.clone(), Arc::new(RealClock::new()));
        (store, processor)
    }

    fn succeeded_event(booking_id: Option<Uuid>) -> PaymentEvent {
        let body = json!({
            "id": "evt_1",
            "type": "payment.succeeded",
            "data": {
                "object": {
                    "id": "pi_1",
                    "amount": 5000,
                    "currency": "usd",
                    "metadata": {"booking_id": booking_id},
                }
            }
        });
        PaymentEvent::parse(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged_without_side_effects() {
        let (store, processor) = processor_with_store();

        let event = PaymentEvent::parse(
            br#"{"id": "evt_1", "type": "customer.subscription.created"}"#,
        )
        .unwrap();

        let response = processor.dispatch("stripe", "stripe_evt_1", &event).await.unwrap();
        assert_eq!(response["status"], "ignored");
        assert_eq!(store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn payment_succeeded_creates_transaction_and_marks_booking() {
        let (store, processor) = processor_with_store();
        let booking_id = BookingId::new();
        store.add_booking(booking_id, BookingPaymentState::Pending).await;

        let event = succeeded_event(Some(booking_id.0));
        let response = processor.dispatch("stripe", "stripe_evt_1", &event).await.unwrap();

        assert_eq!(response["status"], "processed");
        assert_eq!(store.payment_count().await, 1);

        let payment = store.payment_for_key("stripe_evt_1").await.unwrap();
        assert_eq!(payment.amount_cents, 5000);
        assert_eq!(payment.external_id, "pi_1");
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(
            store.booking_state(booking_id).await,
            Some(BookingPaymentState::Paid)
        );
    }

    #[tokio::test]
    async fn repeated_dispatch_creates_one_transaction() {
        let (store, processor) = processor_with_store();

        let event = succeeded_event(None);
        processor.dispatch("stripe", "stripe_evt_1", &event).await.unwrap();
        processor.dispatch("stripe", "stripe_evt_1", &event).await.unwrap();

        assert_eq!(store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn payment_failed_updates_booking_only() {
        let (store, processor) = processor_with_store();
        let booking_id = BookingId::new();
        store.add_booking(booking_id, BookingPaymentState::Pending).await;

        let body = json!({
            "id": "evt_2",
            "type": "payment.failed",
            "data": {"object": {"amount": 5000, "metadata": {"booking_id": booking_id.0}}}
        });
        let event = PaymentEvent::parse(body.to_string().as_bytes()).unwrap();

        let response = processor.dispatch("stripe", "stripe_evt_2", &event).await.unwrap();
        assert_eq!(response["status"], "processed");
        assert_eq!(store.payment_count().await, 0);
        assert_eq!(
            store.booking_state(booking_id).await,
            Some(BookingPaymentState::Failed)
        );
    }

    #[tokio::test]
    async fn refund_updates_transaction_and_booking() {
        let (store, processor) = processor_with_store();
        let booking_id = BookingId::new();
        store.add_booking(booking_id, BookingPaymentState::Pending).await;

        let event = succeeded_event(Some(booking_id.0));
        processor.dispatch("stripe", "stripe_evt_1", &event).await.unwrap();

        let body = json!({
            "id": "evt_3",
            "type": "payment.refunded",
            "data": {"object": {"id": "pi_1", "amount": 5000}}
        });
        let refund = PaymentEvent::parse(body.to_string().as_bytes()).unwrap();
        processor.dispatch("stripe", "stripe_evt_3", &refund).await.unwrap();

        let payment = store.payment_for_key("stripe_evt_1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(
            store.booking_state(booking_id).await,
            Some(BookingPaymentState::Refunded)
        );
    }

    #[tokio::test]
    async fn refund_before_payment_surfaces_error() {
        let (_store, processor) = processor_with_store();

        let body = json!({
            "id": "evt_4",
            "type": "payment.refunded",
            "data": {"object": {"id": "pi_unknown", "amount": 5000}}
        });
        let event = PaymentEvent::parse(body.to_string().as_bytes()).unwrap();

        let result = processor.dispatch("stripe", "stripe_evt_4", &event).await;
        assert!(matches!(result, Err(ProcessError::Persistence(_))));
    }

    #[tokio::test]
    async fn malformed_object_is_reported() {
        let (_store, processor) = processor_with_store();

        // payment.succeeded without an amount.
        let event =
            PaymentEvent::parse(br#"{"id": "evt_5", "type": "payment.succeeded"}"#).unwrap();

        let result = processor.dispatch("stripe", "stripe_evt_5", &event).await;
        assert!(matches!(result, Err(ProcessError::Malformed(_))));
    }
}
