//! Outbound resilience for third-party API calls.
//!
//! Every outbound call to a volatile dependency goes through a
//! [`ServiceBreaker`]: a token-bucket rate limiter sheds load before the
//! circuit breaker decides admission, and the wrapped call runs under a
//! bounded deadline. One breaker+limiter pair exists per named service,
//! created lazily by the [`BreakerRegistry`] and shared across all
//! concurrent callers.
//!
//! # Outbound call flow
//!
//! ```text
//! caller ──▶ BreakerRegistry::execute(service, fn)
//!               │
//!               ├─ TokenBucket::allow()  ──── false ──▶ Err(RateLimited)
//!               ├─ CircuitBreaker admission ─ open ───▶ Err(CircuitOpen)
//!               ├─ fn() under deadline ─────────────────▶ result
//!               └─ classify + record ──▶ breaker state update
//! ```
//!
//! Callers never see breaker or limiter internals, only the unified
//! [`GuardError`] taxonomy. Circuit state transitions are the one place
//! this subsystem talks to observability infrastructure, through the
//! [`MetricsSink`] seam.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod registry;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use error::{ErrorKind, GuardError, Result};
pub use limiter::{RateLimiterConfig, TokenBucket};
pub use metrics::{MetricsSink, RecordingSink, TracingSink};
pub use registry::{BreakerRegistry, ServiceBreaker, ServiceSettings};
