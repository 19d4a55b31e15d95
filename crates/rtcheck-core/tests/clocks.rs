use std::time::Duration;

use rtcheck_core::probe::monotonic::{MonotonicConfig, MonotonicProbe};
use rtcheck_core::probe::tick::{TickConfig, TickMeasurement, TickProbe};
use rtcheck_core::probe::timing::{SleepAccuracyProbe, SleepConfig};
use rtcheck_core::sim::{ManualClock, ScriptedClock, SteppedClock};
use rtcheck_core::{ClockChannel, ProbeError, SystemTimeSource, TimeSource};

#[test]
fn regression_message_names_channel_and_pair() {
    let clock = ScriptedClock::new(vec![100, 100, 101, 101, 99]);
    let err = MonotonicProbe::new(MonotonicConfig {
        duration: Duration::from_secs(1),
        ..MonotonicConfig::default()
    })
    .run(&clock)
    .unwrap_err();

    assert!(err.is_assertion());
    let message = err.to_string();
    assert!(message.starts_with("monotonic time goes back in time at sample 5"));
    assert!(message.contains("current = 99, previous = 101"));
}

#[test]
fn nano_channel_is_polled_in_nanoseconds() {
    let clock = SteppedClock::new(0, 1, 4);
    let report = MonotonicProbe::new(MonotonicConfig {
        duration: Duration::from_millis(100),
        heartbeat: Duration::from_millis(25),
        safety_margin: Duration::from_secs(5),
        channel: ClockChannel::MonotonicNanos,
    })
    .run(&clock)
    .unwrap();

    assert_eq!(report.channel, ClockChannel::MonotonicNanos);
    assert!(report.last - report.first >= 100_000_000);
    assert!(report.heartbeats >= 3);
}

#[test]
fn host_clock_is_monotonic_for_a_short_window() {
    let clock = SystemTimeSource::new();
    let report = MonotonicProbe::new(MonotonicConfig {
        duration: Duration::from_millis(50),
        ..MonotonicConfig::default()
    })
    .run(&clock)
    .unwrap();
    assert!(report.samples > 1);
}

#[test]
fn tick_probe_reports_both_channels() {
    let clock = SteppedClock::new(5_000, 2, 8);
    let reports = TickProbe::new(TickConfig::default()).run(&clock).unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].channel, ClockChannel::Application);
    assert_eq!(reports[0].measurement, TickMeasurement::Exact(2));
    assert_eq!(reports[0].limit, 20);
    assert_eq!(reports[1].channel, ClockChannel::MonotonicNanos);
    assert_eq!(reports[1].measurement, TickMeasurement::Exact(2_000_000));
    assert_eq!(reports[1].limit, 20_000_000);
}

#[test]
fn coarse_tick_fails_against_limit() {
    let clock = SteppedClock::new(0, 50, 3);
    let err = TickProbe::new(TickConfig::default())
        .measure(&clock, ClockChannel::Application)
        .unwrap_err();
    assert_eq!(
        err,
        ProbeError::assertion(
            "application time timer precision (50 ms) is lower than the expected limit (20 ms)"
        )
    );
}

#[test]
fn late_scheduler_wakeup_fails_sleep_accuracy() {
    let clock = ManualClock::new(0).with_overshoot(Duration::from_millis(30));
    let err = SleepAccuracyProbe::new(SleepConfig {
        delay: Duration::from_millis(500),
        limit: Duration::from_millis(20),
    })
    .run(&clock, &clock)
    .unwrap_err();
    assert!(err.is_assertion());
    assert!(clock.monotonic_millis() >= 530);
}
