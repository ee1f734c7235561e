//! Error types for guarded outbound calls.
//!
//! Business-logic callers receive this taxonomy regardless of which
//! third-party API failed. The classification drives two independent
//! decisions: whether the breaker counts the call as an upstream fault,
//! and whether the caller may usefully retry.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for guarded outbound operations.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors surfaced by the outbound resilience layer.
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    /// The per-service token bucket was empty; the call was shed before
    /// the wrapped function ran. Breaker state is untouched.
    #[error("rate limit exceeded for service {service}")]
    RateLimited {
        /// Service whose bucket was exhausted.
        service: String,
    },

    /// The circuit breaker rejected the call; the wrapped function never
    /// ran.
    #[error("circuit breaker open for service {service}")]
    CircuitOpen {
        /// Service whose circuit is open.
        service: String,
    },

    /// The wrapped call exceeded its deadline.
    #[error("request deadline exceeded after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The upstream responded with a 5xx-class status.
    #[error("upstream failure: HTTP {status}")]
    UpstreamStatus {
        /// HTTP status code (5xx).
        status: u16,
        /// Response body content, truncated by the caller.
        body: String,
    },

    /// The upstream responded with a 4xx-class status.
    ///
    /// Indicates a bad request, not an unhealthy dependency; does not
    /// count toward tripping the breaker.
    #[error("client error: HTTP {status}")]
    ClientStatus {
        /// HTTP status code (4xx).
        status: u16,
        /// Response body content, truncated by the caller.
        body: String,
    },

    /// Connection-level failure before any response arrived.
    #[error("network failure: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },
}

/// Stable error kind exposed to business logic.
///
/// Collapses the full taxonomy into the four cases callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shed by the rate limiter; retry with backoff.
    RateLimited,
    /// Rejected by an open circuit; retry after the breaker recovers.
    CircuitOpen,
    /// The dependency itself failed (5xx, deadline, network).
    UpstreamFailure,
    /// The request was at fault (4xx); retrying unchanged will not help.
    ClientFault,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::UpstreamFailure => write!(f, "upstream_failure"),
            Self::ClientFault => write!(f, "client_fault"),
        }
    }
}

impl GuardError {
    /// Creates a rate-limited error for a service.
    pub fn rate_limited(service: impl Into<String>) -> Self {
        Self::RateLimited { service: service.into() }
    }

    /// Creates a circuit-open error for a service.
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen { service: service.into() }
    }

    /// Creates a timeout error from the exceeded deadline.
    pub fn timeout(deadline: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Classifies an HTTP response status.
    ///
    /// Returns `None` for success statuses; 5xx maps to `UpstreamStatus`
    /// and everything else non-2xx to `ClientStatus`.
    pub fn from_status(status: u16, body: impl Into<String>) -> Option<Self> {
        match status {
            200..=299 => None,
            500..=599 => Some(Self::UpstreamStatus { status, body: body.into() }),
            _ => Some(Self::ClientStatus { status, body: body.into() }),
        }
    }

    /// Classifies a `reqwest` transport error.
    ///
    /// Timeouts and connect failures are distinguished because they count
    /// toward the breaker; callers pass the deadline they configured.
    pub fn from_reqwest(err: &reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            return Self::timeout(deadline);
        }
        if err.is_connect() {
            return Self::network(format!("connection failed: {err}"));
        }
        Self::network(err.to_string())
    }

    /// Returns the stable error kind for business-logic branching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } | Self::UpstreamStatus { .. } | Self::Network { .. } => {
                ErrorKind::UpstreamFailure
            },
            Self::ClientStatus { .. } => ErrorKind::ClientFault,
        }
    }

    /// Whether this error counts toward tripping the circuit breaker.
    ///
    /// Client faults do not: they indicate a bad request, not an
    /// unhealthy dependency. Rate-limit sheds never reach the breaker.
    pub fn is_upstream_fault(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::UpstreamStatus { .. } | Self::Network { .. }
        )
    }

    /// Whether a caller may usefully retry after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ClientStatus { .. })
    }
}
