//! Repository for booking payment state.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Booking, BookingId, BookingPaymentState},
};

/// Repository for booking persistence.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a booking row.
    ///
    /// Bookings are normally created by the wider platform; this exists
    /// for provisioning and integration tests.
    pub async fn create(&self, booking: &Booking) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO bookings (id, payment_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(booking.id)
        .bind(booking.payment_status)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a booking by ID.
    pub async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(booking)
    }

    /// Updates a booking's payment status.
    pub async fn set_payment_status(&self, id: BookingId, status: BookingPaymentState) -> Result<()> {
        sqlx::query("UPDATE bookings SET payment_status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}
