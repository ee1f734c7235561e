//! HTTP request handlers.
//!
//! Organized by concern:
//! - `webhooks`: inbound webhook verification, deduplication, dispatch
//! - `health`: liveness/readiness probes and circuit breaker stats

pub mod health;
pub mod webhooks;

pub use health::{circuit_stats, health_check, liveness_check, readiness_check};
pub use webhooks::receive_webhook;
