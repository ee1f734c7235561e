//! Inbound webhook path for the Breakwater middleware.
//!
//! Verifies payment-provider webhooks against a shared secret, enforces
//! exactly-once observable effect on top of at-least-once delivery, and
//! dispatches verified events to their side-effect handlers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod event;
pub mod handlers;
pub mod idempotency;
pub mod processor;
pub mod server;
pub mod store;

pub use config::{Config, ProviderConfig};
pub use event::PaymentEvent;
pub use idempotency::IdempotencyStore;
pub use processor::{EventProcessor, ProcessError};
pub use server::{create_router, start_server, AppState};
pub use store::{PostgresWebhookStore, WebhookStore};
