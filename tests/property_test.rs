//! Property-based tests for resilience invariants.
//!
//! Uses randomly generated inputs to verify system-wide invariants:
//! token buckets never exceed their refill budget, any single-bit
//! corruption of a signed payload is rejected, and an open circuit never
//! admits a call before its timeout.

use std::{collections::HashMap, sync::Arc, time::Duration};

use breakwater_api::crypto;
use breakwater_core::TestClock;
use breakwater_guard::{
    BreakerConfig, BreakerRegistry, BreakerState, GuardError, RateLimiterConfig, ServiceSettings,
    TokenBucket, TracingSink,
};
use proptest::prelude::*;

/// Creates property test configuration based on environment.
fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(32);

    ProptestConfig::with_cases(cases)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build runtime")
        .block_on(future)
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Over any schedule of attempts and clock advances, the number of
    /// admitted calls never exceeds the initial burst plus the refill
    /// budget earned by elapsed time.
    #[test]
    fn token_bucket_never_exceeds_budget(
        max_tokens in 1u32..20,
        refill_ms in 1u64..50,
        schedule in prop::collection::vec((0u64..100, 1u32..10), 1..20)
    ) {
        block_on(async {
            let clock = TestClock::new();
            let bucket = TokenBucket::new(
                RateLimiterConfig {
                    max_tokens,
                    refill_interval: Duration::from_millis(refill_ms),
                },
                Arc::new(clock.clone()),
            );

            let mut allowed: u64 = 0;
            let mut total_elapsed_ms: u64 = 0;

            for (advance_ms, attempts) in schedule {
                clock.advance(Duration::from_millis(advance_ms));
                total_elapsed_ms += advance_ms;

                for _ in 0..attempts {
                    if bucket.allow().await {
                        allowed += 1;
                    }
                }
            }

            let budget = u64::from(max_tokens) + total_elapsed_ms / refill_ms;
            prop_assert!(
                allowed <= budget,
                "allowed {allowed} calls with budget {budget}"
            );
            Ok(())
        })?;
    }

    /// Flipping any single bit of a signed payload invalidates it.
    #[test]
    fn payload_bit_flip_is_rejected(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        byte_idx in any::<prop::sample::Index>(),
        bit in 0u8..8
    ) {
        let secret = "whsec_property";
        let header = format!("sha256={}", crypto::sign_payload(&payload, secret).unwrap());

        prop_assert!(crypto::verify_signature(&payload, &header, secret).is_ok());

        let mut tampered = payload.clone();
        let idx = byte_idx.index(tampered.len());
        tampered[idx] ^= 1 << bit;

        prop_assert!(
            crypto::verify_signature(&tampered, &header, secret).is_err(),
            "bit flip at byte {idx} bit {bit} was not rejected"
        );
    }

    /// Corrupting any hex character of the signature header invalidates
    /// it.
    #[test]
    fn signature_corruption_is_rejected(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        digit_idx in any::<prop::sample::Index>()
    ) {
        let secret = "whsec_property";
        let digest = crypto::sign_payload(&payload, secret).unwrap();

        let mut corrupted: Vec<u8> = digest.clone().into_bytes();
        let idx = digit_idx.index(corrupted.len());
        // Replace with a different hex digit.
        corrupted[idx] = if corrupted[idx] == b'0' { b'1' } else { b'0' };
        let header = format!("sha256={}", String::from_utf8(corrupted).unwrap());

        prop_assert!(
            crypto::verify_signature(&payload, &header, secret).is_err(),
            "corrupted signature digit {idx} was not rejected"
        );
    }

    /// An open circuit admits no call until its timeout elapses,
    /// regardless of how many attempts arrive.
    #[test]
    fn open_circuit_never_admits_before_timeout(
        attempts in 1usize..50,
        elapsed_ms in 0u64..500
    ) {
        block_on(async {
            let clock = TestClock::new();
            let settings = ServiceSettings {
                breaker: BreakerConfig {
                    max_requests: 1,
                    min_requests: 3,
                    failure_threshold: 0.5,
                    interval: Duration::from_secs(60),
                    timeout: Duration::from_millis(500),
                },
                rate_limit: RateLimiterConfig {
                    max_tokens: 1000,
                    refill_interval: Duration::from_millis(1),
                },
                call_timeout: Duration::from_secs(1),
            };
            let registry = BreakerRegistry::new(
                settings,
                HashMap::new(),
                Arc::new(clock.clone()),
                Arc::new(TracingSink),
            );

            for _ in 0..3 {
                let _: Result<(), _> = registry
                    .execute("flaky_api", || async {
                        Err(GuardError::from_status(500, "boom").unwrap())
                    })
                    .await;
            }
            let breaker = registry.breaker("flaky_api").await;
            prop_assert_eq!(breaker.state().await, BreakerState::Open);

            // Advance strictly less than the timeout.
            clock.advance(Duration::from_millis(elapsed_ms));

            let mut invoked = 0u32;
            for _ in 0..attempts {
                let result: Result<(), _> = registry
                    .execute("flaky_api", || async {
                        invoked += 1;
                        Ok(())
                    })
                    .await;
                prop_assert!(
                    matches!(result, Err(GuardError::CircuitOpen { .. })),
                    "expected CircuitOpen error"
                );
            }

            prop_assert_eq!(invoked, 0, "wrapped function ran while circuit was open");
            Ok(())
        })?;
    }
}
