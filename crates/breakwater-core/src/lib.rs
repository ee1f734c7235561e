//! Domain models and shared primitives for the Breakwater middleware.
//!
//! Provides strongly-typed identifiers, webhook event and payment
//! transaction records, the storage layer, and the clock abstraction used
//! for deterministic testing. The `breakwater-guard` and `breakwater-api`
//! crates build on these foundations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    Booking, BookingId, BookingPaymentState, EventId, PaymentStatus, PaymentTransaction,
    TransactionId, WebhookEventRecord,
};
pub use time::{Clock, RealClock, TestClock};
