//! Registry of per-service breakers and the unified outbound entry point.
//!
//! One [`ServiceBreaker`] exists per named external service for the
//! process lifetime, created on first use. Construction is guarded by a
//! read-probe / write-recheck sequence so concurrent first callers never
//! build duplicate instances.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use breakwater_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker},
    error::{GuardError, Result},
    limiter::{RateLimiterConfig, TokenBucket},
    metrics::MetricsSink,
};

/// Complete resilience settings for one guarded service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Token bucket rate limit.
    pub rate_limit: RateLimiterConfig,
    /// Deadline applied to each wrapped call.
    pub call_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Breaker + limiter pair guarding one external service.
///
/// The limiter is consulted first: a shed call never touches breaker
/// state. The wrapped call runs outside both locks, under the configured
/// deadline.
#[derive(Debug)]
pub struct ServiceBreaker {
    name: String,
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    call_timeout: Duration,
}

impl ServiceBreaker {
    fn new(
        name: &str,
        settings: ServiceSettings,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: name.to_string(),
            breaker: CircuitBreaker::new(name, settings.breaker, clock.clone(), metrics),
            limiter: TokenBucket::new(settings.rate_limit, clock),
            call_timeout: settings.call_timeout,
        }
    }

    /// Name of the guarded service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs an outbound call through the limiter, breaker, and deadline.
    ///
    /// The call result is classified before being recorded: deadline
    /// expiry, 5xx responses, and network failures count as upstream
    /// faults; client faults pass through without penalizing the breaker.
    ///
    /// # Errors
    ///
    /// - `RateLimited` when the token bucket is empty (call never ran)
    /// - `CircuitOpen` when the breaker rejects admission (call never ran)
    /// - the call's own `GuardError` otherwise
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.limiter.allow().await {
            tracing::debug!(service = %self.name, "outbound call shed by rate limiter");
            return Err(GuardError::rate_limited(&self.name));
        }

        self.breaker.try_acquire().await?;

        let outcome = match tokio::time::timeout(self.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(GuardError::timeout(self.call_timeout)),
        };

        let success = match &outcome {
            Ok(_) => true,
            Err(e) => !e.is_upstream_fault(),
        };
        self.breaker.record(success).await;

        outcome
    }

    /// Current breaker state.
    pub async fn state(&self) -> BreakerState {
        self.breaker.state().await
    }

    /// Point-in-time breaker snapshot.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot().await
    }
}

/// Lazily-populated map of service name to [`ServiceBreaker`].
#[derive(Debug)]
pub struct BreakerRegistry {
    defaults: ServiceSettings,
    overrides: HashMap<String, ServiceSettings>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    breakers: RwLock<HashMap<String, Arc<ServiceBreaker>>>,
}

impl BreakerRegistry {
    /// Creates a registry with default settings and per-service overrides.
    pub fn new(
        defaults: ServiceSettings,
        overrides: HashMap<String, ServiceSettings>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self { defaults, overrides, clock, metrics, breakers: RwLock::new(HashMap::new()) }
    }

    /// Returns the breaker for a service, creating it on first use.
    ///
    /// The fast path takes only the read lock. On a miss the write lock is
    /// taken and the map re-checked, so a race between first callers
    /// produces exactly one instance.
    pub async fn breaker(&self, service: &str) -> Arc<ServiceBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(service) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get(service) {
            return breaker.clone();
        }

        let settings =
            self.overrides.get(service).cloned().unwrap_or_else(|| self.defaults.clone());
        let breaker = Arc::new(ServiceBreaker::new(
            service,
            settings,
            self.clock.clone(),
            self.metrics.clone(),
        ));
        breakers.insert(service.to_string(), breaker.clone());
        breaker
    }

    /// Runs an outbound call through the named service's guard.
    ///
    /// This is the interface business logic consumes; limiter and breaker
    /// internals stay private to this crate.
    pub async fn execute<T, F, Fut>(&self, service: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker(service).await.execute(op).await
    }

    /// Snapshots every breaker created so far, keyed by service name.
    pub async fn snapshots(&self) -> HashMap<String, BreakerSnapshot> {
        let breakers = self.breakers.read().await;
        let mut snapshots = HashMap::with_capacity(breakers.len());
        for (name, breaker) in breakers.iter() {
            snapshots.insert(name.clone(), breaker.snapshot().await);
        }
        snapshots
    }
}
