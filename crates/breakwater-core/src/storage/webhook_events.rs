//! Repository for webhook event records.
//!
//! The insert path is the linchpin of inbound idempotency: the unique
//! index on `idempotency_key` arbitrates between concurrent duplicate
//! deliveries, and a duplicate-key conflict is reported as a normal
//! outcome rather than an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{EventId, WebhookEventRecord},
};

/// Outcome of attempting to insert a webhook event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was inserted; this request won first-processing rights.
    Inserted,
    /// A record with the same idempotency key already exists.
    Duplicate,
}

/// Repository for webhook event persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new event record, treating duplicate keys as a normal
    /// outcome.
    ///
    /// Exactly one of N concurrent inserts with the same key observes
    /// `Inserted`; the rest observe `Duplicate` and must consult the
    /// existing row for the authoritative outcome.
    pub async fn insert(&self, event: &WebhookEventRecord) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r"
            INSERT INTO webhook_events (
                id, provider, event_type, source_event_id, idempotency_key,
                payload, signature, retry_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(event.id)
        .bind(&event.provider)
        .bind(&event.event_type)
        .bind(&event.source_event_id)
        .bind(&event.idempotency_key)
        .bind(&event.payload)
        .bind(&event.signature)
        .bind(event.retry_count)
        .bind(event.created_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Finds an event record by its idempotency key.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<WebhookEventRecord>> {
        let record = sqlx::query_as::<_, WebhookEventRecord>(
            "SELECT * FROM webhook_events WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }

    /// Stamps an event as successfully processed.
    pub async fn mark_processed(&self, id: EventId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_events SET processed_at = $2, processing_error = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed processing run and returns the new retry count.
    pub async fn record_failure(&self, id: EventId, error: &str) -> Result<i32> {
        let (retry_count,): (i32,) = sqlx::query_as(
            r"
            UPDATE webhook_events
            SET processing_error = $2, retry_count = retry_count + 1
            WHERE id = $1
            RETURNING retry_count
            ",
        )
        .bind(id)
        .bind(error)
        .fetch_one(&*self.pool)
        .await?;

        Ok(retry_count)
    }
}
