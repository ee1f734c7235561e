//! Repository for payment transactions.
//!
//! Payment side effects are committed atomically: the transaction row and
//! the dependent booking update succeed or roll back together. The unique
//! index on `idempotency_key` guarantees at most one side effect per
//! external event, across processes, without any distributed lock.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{BookingId, BookingPaymentState, PaymentStatus, PaymentTransaction},
};

/// Outcome of attempting to record a payment side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The transaction row was created and the booking updated.
    Recorded,
    /// A transaction with the same idempotency key already exists; nothing
    /// was written.
    AlreadyRecorded,
}

/// Repository for payment transaction persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Records a successful payment and marks the related booking paid,
    /// atomically.
    ///
    /// A duplicate idempotency key aborts the whole unit: the booking
    /// update from the first processing run already happened, so nothing
    /// is re-applied.
    pub async fn record_payment(&self, payment: &PaymentTransaction) -> Result<PaymentOutcome> {
        let mut txn = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO payment_transactions (
                id, provider, external_id, idempotency_key, amount_cents,
                currency, status, booking_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(payment.id)
        .bind(&payment.provider)
        .bind(&payment.external_id)
        .bind(&payment.idempotency_key)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(payment.booking_id)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *txn)
        .await;

        match inserted {
            Ok(_) => {},
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                txn.rollback().await?;
                return Ok(PaymentOutcome::AlreadyRecorded);
            },
            Err(e) => return Err(e.into()),
        }

        if let Some(booking_id) = payment.booking_id {
            sqlx::query(
                "UPDATE bookings SET payment_status = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(booking_id)
            .bind(BookingPaymentState::Paid)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(PaymentOutcome::Recorded)
    }

    /// Marks a stored transaction refunded and updates its booking,
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no transaction matches the
    /// provider/external ID pair; the caller surfaces this so the sender
    /// re-delivers once the original payment event has landed.
    pub async fn record_refund(&self, provider: &str, external_id: &str) -> Result<()> {
        let mut txn = self.pool.begin().await?;

        let row: Option<(Option<BookingId>,)> = sqlx::query_as(
            r"
            UPDATE payment_transactions
            SET status = $3, updated_at = NOW()
            WHERE provider = $1 AND external_id = $2
            RETURNING booking_id
            ",
        )
        .bind(provider)
        .bind(external_id)
        .bind(PaymentStatus::Refunded)
        .fetch_optional(&mut *txn)
        .await?;

        let Some((booking_id,)) = row else {
            txn.rollback().await?;
            return Err(CoreError::NotFound(format!(
                "no transaction for {provider} object {external_id}"
            )));
        };

        if let Some(booking_id) = booking_id {
            sqlx::query(
                "UPDATE bookings SET payment_status = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(booking_id)
            .bind(BookingPaymentState::Refunded)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Finds a transaction by its idempotency key.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentTransaction>> {
        let record = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT * FROM payment_transactions WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }
}
