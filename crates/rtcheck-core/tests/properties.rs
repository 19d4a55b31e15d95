use std::time::Duration;

use proptest::prelude::*;
use rtcheck_core::probe::fairness::imbalance_pct;
use rtcheck_core::probe::monotonic::{MonotonicConfig, MonotonicProbe};
use rtcheck_core::sim::ScriptedClock;
use rtcheck_core::{FairnessConfig, FairnessStats, ProbeError};

fn non_decreasing(start: i64, steps: Vec<u8>) -> Vec<i64> {
    let mut samples = Vec::with_capacity(steps.len() + 1);
    let mut value = start;
    samples.push(value);
    for step in steps {
        value += i64::from(step % 3);
        samples.push(value);
    }
    samples
}

proptest! {
    #[test]
    fn imbalance_is_zero_for_equal_counters(counter in 1u64..1_000_000, workers in 2usize..16) {
        let stats = FairnessStats::from_counters(vec![counter; workers]);
        prop_assert_eq!(stats.imbalance_pct, 0);
        prop_assert_eq!(stats.delta, 0);
        prop_assert_eq!(stats.average, counter);
    }

    #[test]
    fn imbalance_grows_with_max(min in 1u64..100_000, extra in 0u64..100_000, more in 1u64..100_000) {
        prop_assert!(imbalance_pct(min, min + extra) <= imbalance_pct(min, min + extra + more));
    }

    #[test]
    fn stats_bound_every_counter(counters in prop::collection::vec(0u64..1_000_000, 2..12)) {
        let stats = FairnessStats::from_counters(counters.clone());
        for counter in &counters {
            prop_assert!(stats.min <= *counter && *counter <= stats.max);
        }
        prop_assert!(stats.min <= stats.average && stats.average <= stats.max);
        if stats.min == 0 {
            prop_assert_eq!(stats.imbalance_pct, 100);
        }
    }

    #[test]
    fn starved_worker_never_passes(counters in prop::collection::vec(1u64..1_000_000, 1..8)) {
        let mut counters = counters;
        counters.push(0);
        let stats = FairnessStats::from_counters(counters);
        let config = FairnessConfig { min_counter: 0, max_imbalance_pct: 99, ..FairnessConfig::default() };
        prop_assert!(stats.check(&config).is_err());
    }

    #[test]
    fn non_decreasing_reads_pass(start in -1_000i64..1_000, steps in prop::collection::vec(any::<u8>(), 1..256)) {
        let samples = non_decreasing(start, steps);
        let last = *samples.last().unwrap();
        let window = u64::try_from(last - start).unwrap();
        let clock = ScriptedClock::new(samples);
        let report = MonotonicProbe::new(MonotonicConfig {
            duration: Duration::from_millis(window),
            ..MonotonicConfig::default()
        })
        .run(&clock)
        .unwrap();
        prop_assert_eq!(report.last, last);
    }

    #[test]
    fn single_regression_is_caught(prefix in prop::collection::vec(any::<u8>(), 1..64), drop in 1i64..50) {
        let mut samples = non_decreasing(1_000, prefix);
        let top = *samples.last().unwrap();
        samples.push(top - drop);
        samples.push(top + 1_000_000);
        let expected_sample = samples.len() as u64 - 1;
        let clock = ScriptedClock::new(samples);
        let err = MonotonicProbe::new(MonotonicConfig::default()).run(&clock).unwrap_err();
        match err {
            ProbeError::ClockRegression { sample, previous, current, .. } => {
                prop_assert_eq!(sample, expected_sample);
                prop_assert_eq!(previous, top);
                prop_assert_eq!(current, top - drop);
            }
            other => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
