//! Property-based tests for circuit breaker state transitions

#[cfg(test)]
mod tests {
    use crate::circuit_breaker::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct Flaky;

    impl FailureKind for Flaky {
        fn failure_kind(&self) -> &str {
            "network"
        }
    }

    fn run(cb: &CircuitBreaker, ok: bool) -> Result<(), CallError<Flaky>> {
        tokio_test::block_on(cb.execute(|| async move {
            if ok {
                Ok(())
            } else {
                Err(Flaky)
            }
        }))
    }

    proptest! {
        /// The circuit opens exactly when the run of consecutive failures
        /// reaches the threshold, and never before.
        #[test]
        fn prop_opens_at_threshold(threshold in 1u32..8, outcomes in prop::collection::vec(any::<bool>(), 0..40)) {
            let cb = CircuitBreaker::new(
                "prop",
                CircuitBreakerConfig::default()
                    .with_failure_threshold(threshold)
                    .with_recovery_timeout(Duration::from_secs(3600)),
            );

            let mut streak = 0u32;
            let mut opened = false;
            for ok in outcomes {
                let result = run(&cb, ok);
                if opened {
                    prop_assert!(result.unwrap_err().is_rejected());
                    continue;
                }
                if ok {
                    streak = 0;
                } else {
                    streak += 1;
                }
                if streak >= threshold {
                    opened = true;
                }
                let expected = if opened { CircuitState::Open } else { CircuitState::Closed };
                prop_assert_eq!(cb.state(), expected);
            }
        }

        /// Failure count never exceeds the threshold while closed
        #[test]
        fn prop_failure_count_bounded(threshold in 1u32..6, failures in 0usize..20) {
            let cb = CircuitBreaker::new(
                "prop",
                CircuitBreakerConfig::default()
                    .with_failure_threshold(threshold)
                    .with_recovery_timeout(Duration::from_secs(3600)),
            );

            for _ in 0..failures {
                let _ = run(&cb, false);
            }

            prop_assert!(cb.failure_count() <= threshold);
            prop_assert_eq!(cb.state() == CircuitState::Open, failures as u32 >= threshold);
        }

        /// Display names are stable and distinct
        #[test]
        fn prop_state_display_roundtrips_through_serde(idx in 0usize..3) {
            let state = [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen][idx];
            let json = serde_json::to_string(&state).unwrap();
            prop_assert_eq!(json, format!("\"{}\"", state));
        }
    }
}
