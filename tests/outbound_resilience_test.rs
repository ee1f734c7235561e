//! Integration tests for the outbound resilience path.
//!
//! Runs real HTTP calls through the breaker registry against a mock
//! upstream, verifying fail-fast behavior during outages, load shedding
//! before the wire, and recovery through half-open probing.

use std::{collections::HashMap, sync::Arc, time::Duration};

use breakwater_core::RealClock;
use breakwater_guard::{
    BreakerConfig, BreakerRegistry, BreakerState, GuardError, RateLimiterConfig, ServiceSettings,
    TracingSink,
};
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn registry(settings: ServiceSettings) -> BreakerRegistry {
    BreakerRegistry::new(
        settings,
        HashMap::new(),
        Arc::new(RealClock::new()),
        Arc::new(TracingSink),
    )
}

fn fast_settings() -> ServiceSettings {
    ServiceSettings {
        breaker: BreakerConfig {
            max_requests: 2,
            min_requests: 3,
            failure_threshold: 0.5,
            interval: Duration::from_secs(10),
            timeout: Duration::from_millis(100),
        },
        rate_limit: RateLimiterConfig {
            max_tokens: 100,
            refill_interval: Duration::from_millis(1),
        },
        call_timeout: Duration::from_secs(2),
    }
}

/// Fetches artist metrics from the mock upstream, classifying the
/// response the way a business-logic caller would.
async fn fetch_metrics(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Value, GuardError> {
    let response = client
        .get(format!("{base_url}/artists/123/metrics"))
        .send()
        .await
        .map_err(|e| GuardError::from_reqwest(&e, Duration::from_secs(2)))?;

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    if let Some(err) = GuardError::from_status(status, body.clone()) {
        return Err(err);
    }

    serde_json::from_str(&body).map_err(|e| GuardError::network(e.to_string()))
}

async fn requests_received(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn healthy_upstream_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "artist_id": "123",
            "followers": 100_000,
        })))
        .mount(&server)
        .await;

    let registry = registry(fast_settings());
    let client = reqwest::Client::new();
    let url = server.uri();

    let metrics = registry
        .execute("metrics_api", || fetch_metrics(&client, &url))
        .await
        .unwrap();

    assert_eq!(metrics["followers"], 100_000);
}

#[tokio::test]
async fn upstream_outage_trips_breaker_and_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let registry = registry(fast_settings());
    let client = reqwest::Client::new();
    let url = server.uri();

    // min_requests = 3 failures at 100% trips the circuit.
    for _ in 0..3 {
        let result = registry
            .execute("metrics_api", || fetch_metrics(&client, &url))
            .await;
        assert!(matches!(result, Err(GuardError::UpstreamStatus { status: 503, .. })));
    }

    let hits_before = requests_received(&server).await;
    assert_eq!(hits_before, 3);

    // The next call is rejected without reaching the wire.
    let result = registry
        .execute("metrics_api", || fetch_metrics(&client, &url))
        .await;
    assert!(matches!(result, Err(GuardError::CircuitOpen { .. })));
    assert_eq!(requests_received(&server).await, hits_before);

    let breaker = registry.breaker("metrics_api").await;
    assert_eq!(breaker.state().await, BreakerState::Open);
}

#[tokio::test]
async fn breaker_recovers_through_half_open_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = registry(fast_settings());
    let client = reqwest::Client::new();
    let url = server.uri();

    for _ in 0..3 {
        let _ = registry
            .execute("metrics_api", || fetch_metrics(&client, &url))
            .await;
    }
    let breaker = registry.breaker("metrics_api").await;
    assert_eq!(breaker.state().await, BreakerState::Open);

    // Upstream recovers while the circuit waits out its timeout.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    tokio::time::sleep(Duration::from_millis(120)).await;

    // max_requests = 2 successful trials close the circuit.
    for _ in 0..2 {
        let result = registry
            .execute("metrics_api", || fetch_metrics(&client, &url))
            .await;
        assert!(result.is_ok());
    }

    assert_eq!(breaker.state().await, BreakerState::Closed);
}

#[tokio::test]
async fn rate_limiter_sheds_before_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let mut settings = fast_settings();
    settings.rate_limit =
        RateLimiterConfig { max_tokens: 2, refill_interval: Duration::from_secs(60) };
    let registry = registry(settings);
    let client = reqwest::Client::new();
    let url = server.uri();

    for _ in 0..2 {
        let result = registry
            .execute("metrics_api", || fetch_metrics(&client, &url))
            .await;
        assert!(result.is_ok());
    }

    let result = registry
        .execute("metrics_api", || fetch_metrics(&client, &url))
        .await;
    assert!(matches!(result, Err(GuardError::RateLimited { .. })));
    assert_eq!(requests_received(&server).await, 2);

    // Shed calls never count against the breaker.
    let breaker = registry.breaker("metrics_api").await;
    assert_eq!(breaker.state().await, BreakerState::Closed);
}

#[tokio::test]
async fn client_errors_pass_through_without_tripping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let registry = registry(fast_settings());
    let client = reqwest::Client::new();
    let url = server.uri();

    for _ in 0..5 {
        let result = registry
            .execute("metrics_api", || fetch_metrics(&client, &url))
            .await;
        assert!(matches!(result, Err(GuardError::ClientStatus { status: 404, .. })));
    }

    let breaker = registry.breaker("metrics_api").await;
    assert_eq!(breaker.state().await, BreakerState::Closed);
}

#[tokio::test]
async fn slow_upstream_is_cut_off_by_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artists/123/metrics"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"ok": true}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut settings = fast_settings();
    settings.call_timeout = Duration::from_millis(100);
    let registry = registry(settings);
    let client = reqwest::Client::new();
    let url = server.uri();

    let result = registry
        .execute("metrics_api", || fetch_metrics(&client, &url))
        .await;

    match result {
        Err(GuardError::Timeout { timeout_ms }) => assert_eq!(timeout_ms, 100),
        other => unreachable!("expected deadline expiry, got {other:?}"),
    }

    // Deadline expiry counts toward tripping the breaker.
    let breaker = registry.breaker("metrics_api").await;
    assert_eq!(breaker.snapshot().await.total_failures, 1);
}
