//! Circuit breaker state machine for failure-prone dependencies.
//!
//! Tracks rolling success/failure counts per service and fails fast while
//! the dependency is unhealthy, probing recovery with a limited number of
//! trial calls.
//!
//! # State machine
//!
//! ```text
//!  ┌────────────┐  failure ratio ≥ threshold   ┌──────────┐
//!  │   CLOSED   │ ───────────────────────────▶ │   OPEN   │◀─┐
//!  │ (counting) │   (and requests ≥ minimum)   │(fail fast)│  │ any trial
//!  └────────────┘                              └──────────┘  │ failure
//!        ▲                                          │        │
//!        │ max_requests trial successes     timeout │        │
//!        │                                          ▼        │
//!        │                                  ┌────────────┐   │
//!        └───────────────────────────────── │ HALF-OPEN  │ ──┘
//!                                           │ (probing)  │
//!                                           └────────────┘
//! ```
//!
//! Admission and result recording are separate steps: the breaker's lock
//! serializes only state reads and writes, never the wrapped call itself.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use breakwater_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    error::{GuardError, Result},
    metrics::MetricsSink,
};

/// Circuit breaker configuration for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Trial calls admitted while Half-Open; also the success count
    /// required to close.
    pub max_requests: u32,
    /// Minimum requests in the rolling window before the failure ratio is
    /// considered.
    pub min_requests: u32,
    /// Failure ratio (0.0 to 1.0) that opens the circuit.
    pub failure_threshold: f64,
    /// Length of the rolling window for Closed-state counters.
    pub interval: Duration,
    /// Time to wait in Open before admitting trial calls.
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            min_requests: 5,
            failure_threshold: 0.6,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation; all calls admitted, counters tracked.
    Closed,
    /// Dependency unhealthy; calls rejected without running.
    Open,
    /// Probing recovery with a limited number of trial calls.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl BreakerState {
    /// Gauge encoding reported to the metrics sink.
    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

/// Point-in-time view of one breaker's state, for stats and tests.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Requests recorded in the current window.
    pub requests: u32,
    /// Failures recorded in the current window.
    pub total_failures: u32,
    /// Failure ratio over the current window.
    pub failure_rate: f64,
    /// Trial calls admitted in the current Half-Open phase.
    pub half_open_requests: u32,
    /// How long the circuit has been open, if it is.
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct Window {
    state: BreakerState,
    requests: u32,
    total_failures: u32,
    window_started_at: Instant,
    opened_at: Option<Instant>,
    half_open_requests: u32,
    half_open_successes: u32,
}

impl Window {
    fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

/// Failure-aware gate in front of one external service.
///
/// Owned by a registry entry and shared across all concurrent callers of
/// that service. All state lives behind a single internal lock; the
/// wrapped call runs outside it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    window: Mutex<Window>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named service.
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let window = Window {
            state: BreakerState::Closed,
            requests: 0,
            total_failures: 0,
            window_started_at: clock.now(),
            opened_at: None,
            half_open_requests: 0,
            half_open_successes: 0,
        };

        Self { name: name.into(), config, clock, metrics, window: Mutex::new(window) }
    }

    /// Decides whether a call may proceed.
    ///
    /// An Open circuit whose timeout has elapsed moves to Half-Open before
    /// admitting the call as the first trial. Half-Open admits at most
    /// `max_requests` trials; further calls are rejected until the probe
    /// phase resolves.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::CircuitOpen` when the call must not run.
    pub async fn try_acquire(&self) -> Result<()> {
        let mut window = self.window.lock().await;
        let now = self.clock.now();
        self.roll_window(&mut window, now);

        match window.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let timeout_elapsed = window
                    .opened_at
                    .map_or(true, |opened| now.duration_since(opened) >= self.config.timeout);

                if timeout_elapsed {
                    self.transition_to_half_open(&mut window);
                    window.half_open_requests = 1;
                    Ok(())
                } else {
                    Err(GuardError::circuit_open(&self.name))
                }
            },
            BreakerState::HalfOpen => {
                if window.half_open_requests < self.config.max_requests {
                    window.half_open_requests += 1;
                    Ok(())
                } else {
                    Err(GuardError::circuit_open(&self.name))
                }
            },
        }
    }

    /// Records the outcome of an admitted call.
    ///
    /// In Closed state this feeds the rolling window and may open the
    /// circuit. In Half-Open a single failure reopens it, resetting the
    /// timeout countdown from that failure's timestamp; `max_requests`
    /// consecutive successes close it and reset all counters.
    pub async fn record(&self, success: bool) {
        let mut window = self.window.lock().await;
        let now = self.clock.now();
        self.roll_window(&mut window, now);

        window.requests += 1;
        if !success {
            window.total_failures += 1;
        }

        match window.state {
            BreakerState::Closed => {
                if !success && self.should_open(&window) {
                    self.transition_to_open(&mut window, now);
                }
            },
            // A call admitted before the circuit opened may report late;
            // its result no longer changes state.
            BreakerState::Open => {},
            BreakerState::HalfOpen => {
                if success {
                    window.half_open_successes += 1;
                    if window.half_open_successes >= self.config.max_requests {
                        self.transition_to_closed(&mut window, now);
                    }
                } else {
                    self.transition_to_open(&mut window, now);
                }
            },
        }
    }

    /// Returns the current state without side effects.
    pub async fn state(&self) -> BreakerState {
        self.window.lock().await.state
    }

    /// Returns a point-in-time snapshot for stats and tests.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let window = self.window.lock().await;
        let now = self.clock.now();

        BreakerSnapshot {
            state: window.state,
            requests: window.requests,
            total_failures: window.total_failures,
            failure_rate: window.failure_rate(),
            half_open_requests: window.half_open_requests,
            open_for_ms: window.opened_at.map(|opened| {
                u64::try_from(now.duration_since(opened).as_millis()).unwrap_or(u64::MAX)
            }),
        }
    }

    /// Resets Closed-state counters when the rolling interval has passed.
    fn roll_window(&self, window: &mut Window, now: Instant) {
        if window.state == BreakerState::Closed
            && now.duration_since(window.window_started_at) >= self.config.interval
        {
            window.requests = 0;
            window.total_failures = 0;
            window.window_started_at = now;
        }
    }

    fn should_open(&self, window: &Window) -> bool {
        window.requests >= self.config.min_requests
            && window.failure_rate() >= self.config.failure_threshold
    }

    fn transition_to_open(&self, window: &mut Window, now: Instant) {
        tracing::warn!(
            service = %self.name,
            failures = window.total_failures,
            rate = window.failure_rate(),
            "circuit breaker opening"
        );

        window.state = BreakerState::Open;
        window.opened_at = Some(now);
        window.half_open_requests = 0;
        window.half_open_successes = 0;
        self.emit_state(window.state);
    }

    fn transition_to_half_open(&self, window: &mut Window) {
        tracing::info!(service = %self.name, "circuit breaker transitioning to half-open");

        window.state = BreakerState::HalfOpen;
        window.half_open_requests = 0;
        window.half_open_successes = 0;
        self.emit_state(window.state);
    }

    fn transition_to_closed(&self, window: &mut Window, now: Instant) {
        tracing::info!(service = %self.name, "circuit breaker closing, service recovered");

        window.state = BreakerState::Closed;
        window.requests = 0;
        window.total_failures = 0;
        window.window_started_at = now;
        window.opened_at = None;
        window.half_open_requests = 0;
        window.half_open_successes = 0;
        self.emit_state(window.state);
    }

    fn emit_state(&self, state: BreakerState) {
        self.metrics.gauge(
            "circuit_breaker_state",
            state.gauge_value(),
            &[("service", self.name.as_str())],
        );
    }
}

#[cfg(test)]
mod tests {
    use breakwater_core::TestClock;

    use super::*;
    use crate::metrics::RecordingSink;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            max_requests: 2,
            min_requests: 5,
            failure_threshold: 0.6,
            interval: Duration::from_secs(10),
            timeout: Duration::from_millis(100),
        }
    }

    fn test_breaker() -> (CircuitBreaker, TestClock, Arc<RecordingSink>) {
        let clock = TestClock::new();
        let metrics = Arc::new(RecordingSink::new());
        let breaker = CircuitBreaker::new(
            "stripe_api",
            test_config(),
            Arc::new(clock.clone()),
            metrics.clone(),
        );
        (breaker, clock, metrics)
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            breaker.try_acquire().await.unwrap();
            breaker.record(false).await;
        }
    }

    #[tokio::test]
    async fn breaker_starts_closed() {
        let (breaker, _clock, _metrics) = test_breaker();

        assert!(breaker.try_acquire().await.is_ok());
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn failure_ratio_opens_circuit_after_min_requests() {
        let (breaker, _clock, _metrics) = test_breaker();

        // Four failures: ratio is 1.0 but below min_requests.
        for _ in 0..4 {
            breaker.record(false).await;
        }
        assert_eq!(breaker.state().await, BreakerState::Closed);

        breaker.record(false).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
        assert!(breaker.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn mixed_outcomes_below_threshold_stay_closed() {
        let (breaker, _clock, _metrics) = test_breaker();

        // 5 requests, 2 failures: 40% < 60% threshold.
        for _ in 0..3 {
            breaker.record(true).await;
        }
        for _ in 0..2 {
            breaker.record(false).await;
        }
        assert_eq!(breaker.state().await, BreakerState::Closed);

        // One more failure pushes the ratio to 50%, still below threshold.
        breaker.record(false).await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_rejects_until_timeout() {
        let (breaker, clock, _metrics) = test_breaker();
        trip(&breaker).await;

        clock.advance(Duration::from_millis(99));
        assert!(breaker.try_acquire().await.is_err());

        clock.advance(Duration::from_millis(1));
        assert!(breaker.try_acquire().await.is_ok());
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_limits_trial_calls() {
        let (breaker, clock, _metrics) = test_breaker();
        trip(&breaker).await;
        clock.advance(Duration::from_millis(100));

        // max_requests = 2 trials admitted, the third rejected.
        assert!(breaker.try_acquire().await.is_ok());
        assert!(breaker.try_acquire().await.is_ok());
        assert!(breaker.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn half_open_successes_close_circuit() {
        let (breaker, clock, _metrics) = test_breaker();
        trip(&breaker).await;
        clock.advance(Duration::from_millis(100));

        breaker.try_acquire().await.unwrap();
        breaker.record(true).await;
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);

        breaker.try_acquire().await.unwrap();
        breaker.record(true).await;
        assert_eq!(breaker.state().await, BreakerState::Closed);

        // Counters were reset on close.
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.total_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_resets_countdown() {
        let (breaker, clock, _metrics) = test_breaker();
        trip(&breaker).await;

        clock.advance(Duration::from_millis(100));
        breaker.try_acquire().await.unwrap();

        // Fail the trial call 40ms into the probe phase.
        clock.advance(Duration::from_millis(40));
        breaker.record(false).await;
        assert_eq!(breaker.state().await, BreakerState::Open);

        // The countdown restarts from the trial failure, not the original
        // opening: 99ms later the circuit is still open.
        clock.advance(Duration::from_millis(99));
        assert!(breaker.try_acquire().await.is_err());

        clock.advance(Duration::from_millis(1));
        assert!(breaker.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn rolling_window_forgets_old_failures() {
        let (breaker, clock, _metrics) = test_breaker();

        for _ in 0..4 {
            breaker.record(false).await;
        }

        // The window rolls; stale failures no longer count.
        clock.advance(Duration::from_secs(10));
        breaker.record(false).await;
        assert_eq!(breaker.state().await, BreakerState::Closed);

        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.total_failures, 1);
    }

    #[tokio::test]
    async fn transitions_are_emitted_to_metrics() {
        let (breaker, clock, metrics) = test_breaker();
        trip(&breaker).await;

        clock.advance(Duration::from_millis(100));
        breaker.try_acquire().await.unwrap();
        breaker.record(true).await;
        breaker.try_acquire().await.unwrap();
        breaker.record(true).await;

        // Open (1.0) -> HalfOpen (2.0) -> Closed (0.0).
        assert_eq!(
            metrics.gauge_values("circuit_breaker_state"),
            vec![1.0, 2.0, 0.0]
        );
    }
}
