//! Storage abstraction for the inbound webhook path.
//!
//! Trait-based seam over the durable store so the endpoint and event
//! processor are testable without a database. The production
//! implementation delegates to `breakwater_core::storage`; the mock keeps
//! everything in memory while preserving the unique-key semantics the
//! idempotency design depends on.

use std::{future::Future, pin::Pin, sync::Arc};

use breakwater_core::{
    error::Result,
    models::{BookingId, BookingPaymentState, EventId, PaymentTransaction, WebhookEventRecord},
    storage::{InsertOutcome, PaymentOutcome, Storage},
};
use chrono::{DateTime, Utc};

/// Storage operations required by webhook ingestion and processing.
///
/// All implementations must honor the unique-key contract: for N
/// concurrent `insert_event` calls with one key, exactly one observes
/// [`InsertOutcome::Inserted`]; `record_payment` writes at most one
/// transaction row per key.
pub trait WebhookStore: Send + Sync + 'static {
    /// Inserts a webhook event record, reporting duplicates as an outcome.
    fn insert_event(
        &self,
        event: WebhookEventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome>> + Send + '_>>;

    /// Finds an event record by idempotency key.
    fn find_event_by_key(
        &self,
        key: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookEventRecord>>> + Send + '_>>;

    /// Stamps an event as successfully processed.
    fn mark_event_processed(
        &self,
        id: EventId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a failed processing run, returning the new retry count.
    fn record_event_failure(
        &self,
        id: EventId,
        error: String,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + '_>>;

    /// Atomically records a payment side effect and marks its booking
    /// paid.
    fn record_payment(
        &self,
        payment: PaymentTransaction,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentOutcome>> + Send + '_>>;

    /// Updates a booking's payment state (no transaction row involved).
    fn set_booking_payment_state(
        &self,
        booking_id: BookingId,
        state: BookingPaymentState,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Atomically marks a stored transaction refunded and updates its
    /// booking.
    fn record_refund(
        &self,
        provider: String,
        external_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Verifies the backing store is reachable.
    fn health(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store backed by PostgreSQL repositories.
pub struct PostgresWebhookStore {
    storage: Arc<Storage>,
}

impl PostgresWebhookStore {
    /// Creates a store over the repository container.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl WebhookStore for PostgresWebhookStore {
    fn insert_event(
        &self,
        event: WebhookEventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_events.insert(&event).await })
    }

    fn find_event_by_key(
        &self,
        key: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookEventRecord>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_events.find_by_idempotency_key(&key).await })
    }

    fn mark_event_processed(
        &self,
        id: EventId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_events.mark_processed(id, at).await })
    }

    fn record_event_failure(
        &self,
        id: EventId,
        error: String,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_events.record_failure(id, &error).await })
    }

    fn record_payment(
        &self,
        payment: PaymentTransaction,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentOutcome>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.payment_transactions.record_payment(&payment).await })
    }

    fn set_booking_payment_state(
        &self,
        booking_id: BookingId,
        state: BookingPaymentState,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.bookings.set_payment_status(booking_id, state).await })
    }

    fn record_refund(
        &self,
        provider: String,
        external_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.payment_transactions.record_refund(&provider, &external_id).await
        })
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory store for tests.
    //!
    //! Enforces the same unique-key semantics as the database so
    //! concurrency and idempotency behavior can be exercised without
    //! PostgreSQL.

    use std::{
        collections::HashMap,
        future::Future,
        pin::Pin,
        sync::atomic::{AtomicU32, Ordering},
        sync::Arc,
    };

    use breakwater_core::{
        error::{CoreError, Result},
        models::{
            BookingId, BookingPaymentState, EventId, PaymentStatus, PaymentTransaction,
            WebhookEventRecord,
        },
        storage::{InsertOutcome, PaymentOutcome},
    };
    use chrono::{DateTime, Utc};
    use tokio::sync::RwLock;

    use super::WebhookStore;

    /// In-memory [`WebhookStore`] with injectable failures.
    #[derive(Default)]
    pub struct MockWebhookStore {
        events: Arc<RwLock<HashMap<String, WebhookEventRecord>>>,
        payments: Arc<RwLock<HashMap<String, PaymentTransaction>>>,
        bookings: Arc<RwLock<HashMap<BookingId, BookingPaymentState>>>,
        fail_payments: Arc<AtomicU32>,
    }

    impl MockWebhookStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a booking in the given state.
        pub async fn add_booking(&self, id: BookingId, state: BookingPaymentState) {
            self.bookings.write().await.insert(id, state);
        }

        /// Makes the next `count` payment recordings fail.
        pub fn fail_next_payments(&self, count: u32) {
            self.fail_payments.store(count, Ordering::SeqCst);
        }

        /// Number of payment transaction rows created.
        pub async fn payment_count(&self) -> usize {
            self.payments.read().await.len()
        }

        /// Returns the payment recorded under an idempotency key.
        pub async fn payment_for_key(&self, key: &str) -> Option<PaymentTransaction> {
            self.payments.read().await.get(key).cloned()
        }

        /// Returns the event recorded under an idempotency key.
        pub async fn event_for_key(&self, key: &str) -> Option<WebhookEventRecord> {
            self.events.read().await.get(key).cloned()
        }

        /// Returns a booking's current payment state.
        pub async fn booking_state(&self, id: BookingId) -> Option<BookingPaymentState> {
            self.bookings.read().await.get(&id).copied()
        }
    }

    impl WebhookStore for MockWebhookStore {
        fn insert_event(
            &self,
            event: WebhookEventRecord,
        ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut events = events.write().await;
                if events.contains_key(&event.idempotency_key) {
                    return Ok(InsertOutcome::Duplicate);
                }
                events.insert(event.idempotency_key.clone(), event);
                Ok(InsertOutcome::Inserted)
            })
        }

        fn find_event_by_key(
            &self,
            key: String,
        ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookEventRecord>>> + Send + '_>>
        {
            let events = self.events.clone();
            Box::pin(async move { Ok(events.read().await.get(&key).cloned()) })
        }

        fn mark_event_processed(
            &self,
            id: EventId,
            at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut events = events.write().await;
                if let Some(event) = events.values_mut().find(|e| e.id == id) {
                    event.processed_at = Some(at);
                    event.processing_error = None;
                }
                Ok(())
            })
        }

        fn record_event_failure(
            &self,
            id: EventId,
            error: String,
        ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut events = events.write().await;
                let Some(event) = events.values_mut().find(|e| e.id == id) else {
                    return Err(CoreError::NotFound(format!("event {id} not found")));
                };
                event.processing_error = Some(error);
                event.retry_count += 1;
                Ok(event.retry_count)
            })
        }

        fn record_payment(
            &self,
            payment: PaymentTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<PaymentOutcome>> + Send + '_>> {
            let payments = self.payments.clone();
            let bookings = self.bookings.clone();
            let fail_payments = self.fail_payments.clone();
            Box::pin(async move {
                if fail_payments
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(CoreError::Database("injected payment failure".to_string()));
                }

                // Write lock held across both writes: the database commits
                // the row insert and booking update atomically, so the mock
                // must too.
                let mut payments = payments.write().await;
                if payments.contains_key(&payment.idempotency_key) {
                    return Ok(PaymentOutcome::AlreadyRecorded);
                }

                if let Some(booking_id) = payment.booking_id {
                    bookings.write().await.insert(booking_id, BookingPaymentState::Paid);
                }
                payments.insert(payment.idempotency_key.clone(), payment);
                Ok(PaymentOutcome::Recorded)
            })
        }

        fn set_booking_payment_state(
            &self,
            booking_id: BookingId,
            state: BookingPaymentState,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let bookings = self.bookings.clone();
            Box::pin(async move {
                bookings.write().await.insert(booking_id, state);
                Ok(())
            })
        }

        fn record_refund(
            &self,
            provider: String,
            external_id: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let payments = self.payments.clone();
            let bookings = self.bookings.clone();
            Box::pin(async move {
                let mut payments = payments.write().await;
                let Some(payment) = payments
                    .values_mut()
                    .find(|p| p.provider == provider && p.external_id == external_id)
                else {
                    return Err(CoreError::NotFound(format!(
                        "no transaction for {provider} object {external_id}"
                    )));
                };

                payment.status = PaymentStatus::Refunded;
                if let Some(booking_id) = payment.booking_id {
                    bookings.write().await.insert(booking_id, BookingPaymentState::Refunded);
                }
                Ok(())
            })
        }

        fn health(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[cfg(test)]
    mod tests {
        use chrono::Utc;

        use super::*;

        fn record(key_suffix: &str) -> WebhookEventRecord {
            WebhookEventRecord::new(
                "stripe".to_string(),
                "payment.succeeded".to_string(),
                key_suffix.to_string(),
                b"{}".to_vec(),
                "sha256=test".to_string(),
                Utc::now(),
            )
        }

        #[tokio::test]
        async fn duplicate_insert_reports_duplicate() {
            let store = MockWebhookStore::new();

            let outcome = store.insert_event(record("evt_1")).await.unwrap();
            assert_eq!(outcome, InsertOutcome::Inserted);

            let outcome = store.insert_event(record("evt_1")).await.unwrap();
            assert_eq!(outcome, InsertOutcome::Duplicate);

            let outcome = store.insert_event(record("evt_2")).await.unwrap();
            assert_eq!(outcome, InsertOutcome::Inserted);
        }

        #[tokio::test]
        async fn duplicate_payment_is_not_written_twice() {
            let store = MockWebhookStore::new();
            let booking_id = BookingId::new();
            store.add_booking(booking_id, BookingPaymentState::Pending).await;

            let now = Utc::now();
            let payment = PaymentTransaction {
                id: breakwater_core::TransactionId::new(),
                provider: "stripe".to_string(),
                external_id: "pi_1".to_string(),
                idempotency_key: "stripe_evt_1".to_string(),
                amount_cents: 5000,
                currency: "usd".to_string(),
                status: PaymentStatus::Succeeded,
                booking_id: Some(booking_id),
                created_at: now,
                updated_at: now,
            };

            assert_eq!(
                store.record_payment(payment.clone()).await.unwrap(),
                PaymentOutcome::Recorded
            );
            assert_eq!(
                store.record_payment(payment).await.unwrap(),
                PaymentOutcome::AlreadyRecorded
            );
            assert_eq!(store.payment_count().await, 1);
            assert_eq!(
                store.booking_state(booking_id).await,
                Some(BookingPaymentState::Paid)
            );
        }
    }
}
