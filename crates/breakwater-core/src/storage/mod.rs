//! Database access layer implementing the repository pattern.
//!
//! Repositories translate between domain models and the database schema.
//! All SQL lives here; the webhook endpoint and event processor go through
//! these repositories (directly or via the `breakwater-api` store trait)
//! so the unique-constraint semantics stay in one place.

use std::sync::Arc;

use sqlx::PgPool;

pub mod bookings;
pub mod payment_transactions;
pub mod webhook_events;

pub use payment_transactions::PaymentOutcome;
pub use webhook_events::InsertOutcome;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for webhook event records.
    pub webhook_events: Arc<webhook_events::Repository>,

    /// Repository for payment transactions and their booking updates.
    pub payment_transactions: Arc<payment_transactions::Repository>,

    /// Repository for bookings.
    pub bookings: Arc<bookings::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            webhook_events: Arc::new(webhook_events::Repository::new(pool.clone())),
            payment_transactions: Arc::new(payment_transactions::Repository::new(pool.clone())),
            bookings: Arc::new(bookings::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.webhook_events.pool()).await?;

        Ok(())
    }
}
