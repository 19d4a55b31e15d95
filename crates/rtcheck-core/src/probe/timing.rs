//! Clock/sleep coherence probes: visible clock, sleep accuracy, application
//! time, schedule-request tick and maximum sleep.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::clock::TimeSource;
use crate::error::{ensure, ProbeError};
use crate::sleep::{saturating_deadline, Interrupt, SleepOutcome, Sleeper};

const NANOS_PER_MILLI: i64 = 1_000_000;

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleClockConfig {
    pub duration: Duration,
    pub limit: Duration,
    pub safety_margin: Duration,
}

impl Default for VisibleClockConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            limit: Duration::from_millis(20),
            safety_margin: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleClockReport {
    pub seconds_printed: u64,
    pub application_drift_ms: i64,
    pub nanos_drift_ms: i64,
}

/// Prints every elapsed second of the application clock, then checks that
/// the three readings of the time source agree.
#[derive(Debug, Clone)]
pub struct VisibleClockProbe {
    config: VisibleClockConfig,
}

impl VisibleClockProbe {
    pub fn new(config: VisibleClockConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, clock: &dyn TimeSource) -> Result<VisibleClockReport, ProbeError> {
        let window = millis(self.config.duration);
        let limit = millis(self.config.limit);
        let host_start = Instant::now();
        let host_deadline = saturating_deadline(
            host_start,
            self.config.duration.saturating_add(self.config.safety_margin),
        );

        let start = clock.application_millis();
        let mut seconds: i64 = 0;
        let mut polls: u64 = 0;
        loop {
            let delta = clock.application_millis() - start;
            let elapsed_seconds = delta / 1000;
            if elapsed_seconds > seconds {
                info!("{elapsed_seconds}");
                seconds = elapsed_seconds;
            }
            if delta > window {
                break;
            }
            polls += 1;
            if polls % 1024 == 0 {
                if let Some(deadline) = host_deadline {
                    if Instant::now() >= deadline {
                        return Err(ProbeError::SafetyTimeout {
                            elapsed: host_start.elapsed(),
                            during: "watching the application clock",
                        });
                    }
                }
            }
        }

        let application = clock.application_millis();
        let monotonic = clock.monotonic_millis();
        let application_drift_ms = monotonic - application;
        ensure(application_drift_ms <= limit, || {
            format!(
                "monotonic time != application time (drift {application_drift_ms} ms, limit {limit} ms)"
            )
        })?;

        let nanos_drift_ms = clock.monotonic_nanos() / NANOS_PER_MILLI - clock.monotonic_millis();
        ensure(nanos_drift_ms <= limit, || {
            format!(
                "monotonic nanos / 1000000 != monotonic millis (drift {nanos_drift_ms} ms, limit {limit} ms)"
            )
        })?;

        Ok(VisibleClockReport {
            seconds_printed: u64::try_from(seconds).unwrap_or(0),
            application_drift_ms,
            nanos_drift_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepConfig {
    pub delay: Duration,
    /// Largest accepted oversleep.
    pub limit: Duration,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            limit: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SleepReport {
    pub requested_ms: i64,
    pub measured_ms: i64,
}

/// Checks that a sleep lasts at least the request and at most one tick more.
#[derive(Debug, Clone)]
pub struct SleepAccuracyProbe {
    config: SleepConfig,
}

impl SleepAccuracyProbe {
    pub fn new(config: SleepConfig) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        clock: &dyn TimeSource,
        sleeper: &dyn Sleeper,
    ) -> Result<SleepReport, ProbeError> {
        let delay = millis(self.config.delay);
        let limit = millis(self.config.limit);
        info!("Waiting for {}s...", self.config.delay.as_secs_f32());
        let before = clock.application_millis();
        sleeper.sleep(self.config.delay);
        let after = clock.application_millis();
        info!("...done");

        let measured = after - before;
        ensure(measured >= delay, || {
            format!("real delay ({measured} ms) is shorter than the requested delay ({delay} ms)")
        })?;
        let overshoot = measured - delay;
        ensure(overshoot <= limit, || format!("delta(={overshoot})<={limit}"))?;
        Ok(SleepReport {
            requested_ms: delay,
            measured_ms: measured,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationTimeConfig {
    pub delay: Duration,
    pub offset_ms: i64,
    pub tolerance_ms: i64,
}

impl Default for ApplicationTimeConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            offset_ms: 50_000,
            tolerance_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationTimeReport {
    pub application_shift_ms: i64,
    pub monotonic_advance_ms: i64,
}

/// Moves the application clock and checks that the monotonic clock ignores it.
#[derive(Debug, Clone)]
pub struct ApplicationTimeProbe {
    config: ApplicationTimeConfig,
}

impl ApplicationTimeProbe {
    pub fn new(config: ApplicationTimeConfig) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        clock: &dyn TimeSource,
        sleeper: &dyn Sleeper,
    ) -> Result<ApplicationTimeReport, ProbeError> {
        let delay = millis(self.config.delay);
        let offset = self.config.offset_ms;
        let tolerance = self.config.tolerance_ms;

        info!("Waiting for {}s...", self.config.delay.as_secs_f32());
        let monotonic_before = clock.monotonic_millis();
        let application_before = clock.application_millis();
        let original_skew = application_before - monotonic_before;

        clock.set_application_millis(application_before + offset)?;
        let application_after = clock.application_millis();
        sleeper.sleep(self.config.delay);
        let monotonic_after = clock.monotonic_millis();
        info!("...done");

        // Put the application clock back where it would have been.
        clock.set_application_millis(clock.monotonic_millis() + original_skew)?;

        let expected_application = application_before + offset;
        ensure(
            application_after >= expected_application
                && application_after <= expected_application + tolerance,
            || {
                format!(
                    "application time not set (expected {expected_application}..={}, got {application_after})",
                    expected_application + tolerance
                )
            },
        )?;
        let expected_monotonic = monotonic_before + delay;
        ensure(
            monotonic_after >= expected_monotonic
                && monotonic_after <= expected_monotonic + tolerance,
            || {
                format!(
                    "monotonic time not set (expected {expected_monotonic}..={}, got {monotonic_after})",
                    expected_monotonic + tolerance
                )
            },
        )?;

        Ok(ApplicationTimeReport {
            application_shift_ms: application_after - application_before,
            monotonic_advance_ms: monotonic_after - monotonic_before,
        })
    }
}

/// Measures the granularity of timed wake-ups with two 1 ms sleeps.
#[derive(Debug, Clone)]
pub struct ScheduleTickProbe {
    limit: Duration,
}

impl ScheduleTickProbe {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    /// Returns the measured wake-up granularity in milliseconds.
    pub fn run(&self, clock: &dyn TimeSource, sleeper: &dyn Sleeper) -> Result<i64, ProbeError> {
        let limit = millis(self.limit);
        // The first sleep only aligns on the next tick boundary.
        sleeper.sleep(Duration::from_millis(1));
        let t0 = clock.application_millis();
        sleeper.sleep(Duration::from_millis(1));
        let t1 = clock.application_millis();

        let precision = t1 - t0;
        info!("Estimated schedule request clock tick is {precision} ms.");
        ensure(precision <= limit, || {
            format!(
                "schedule request timer precision ({precision} ms) is lower than the expected limit ({limit} ms)"
            )
        })?;
        Ok(precision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxSleepConfig {
    /// How long the controller sleeps before interrupting the helper.
    pub controller_sleep: Duration,
}

impl Default for MaxSleepConfig {
    fn default() -> Self {
        Self {
            controller_sleep: Duration::from_secs(1),
        }
    }
}

/// Puts a helper to sleep for the largest representable duration, then
/// interrupts it. An overflowing deadline computation shows up either as a
/// sleep that returns immediately or as a hang.
#[derive(Debug, Clone)]
pub struct MaxSleepProbe {
    config: MaxSleepConfig,
}

impl MaxSleepProbe {
    pub fn new(config: MaxSleepConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, sleeper: &dyn Sleeper) -> Result<(), ProbeError> {
        let interrupt = Interrupt::new();
        let helper = {
            let interrupt = Arc::clone(&interrupt);
            thread::Builder::new()
                .name("rtcheck-max-sleep".into())
                .spawn(move || {
                    info!("helper starts sleeping for the maximum duration");
                    interrupt.sleep(Duration::MAX)
                })
                .map_err(|err| ProbeError::Spawn {
                    worker: 0,
                    reason: err.to_string(),
                })?
        };

        info!(
            "Main thread starts sleeping for {}s..",
            self.config.controller_sleep.as_secs_f32()
        );
        sleeper.sleep(self.config.controller_sleep);
        info!("Main thread woke up!");
        interrupt.raise();

        let outcome = helper.join().map_err(|_| ProbeError::WorkerPanicked(0))?;
        ensure(outcome == SleepOutcome::Interrupted, || {
            "max sleep time reached".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ManualClock, SteppedClock};

    #[test]
    fn sleep_on_exact_clock_passes() {
        let clock = ManualClock::new(1_000);
        let report = SleepAccuracyProbe::new(SleepConfig::default())
            .run(&clock, &clock)
            .unwrap();
        assert_eq!(report.requested_ms, 5_000);
        assert_eq!(report.measured_ms, 5_000);
    }

    #[test]
    fn late_wakeup_exceeds_limit() {
        let clock = ManualClock::new(0).with_overshoot(Duration::from_millis(30));
        let err = SleepAccuracyProbe::new(SleepConfig::default())
            .run(&clock, &clock)
            .unwrap_err();
        assert_eq!(err, ProbeError::Assertion("delta(=30)<=20".into()));
    }

    #[test]
    fn application_time_shift_is_restored() {
        let clock = ManualClock::new(10_000);
        let report = ApplicationTimeProbe::new(ApplicationTimeConfig::default())
            .run(&clock, &clock)
            .unwrap();
        assert_eq!(report.application_shift_ms, 50_000);
        assert_eq!(report.monotonic_advance_ms, 5_000);
        assert_eq!(clock.application_millis(), clock.monotonic_millis());
    }

    #[test]
    fn read_only_clock_is_unsupported() {
        let clock = ManualClock::new(0).read_only();
        assert!(matches!(
            ApplicationTimeProbe::new(ApplicationTimeConfig::default()).run(&clock, &clock),
            Err(ProbeError::Unsupported(_))
        ));
    }

    #[test]
    fn schedule_tick_follows_sleep_granularity() {
        let clock = ManualClock::new(0);
        assert_eq!(
            ScheduleTickProbe::new(Duration::from_millis(20))
                .run(&clock, &clock)
                .unwrap(),
            1
        );

        let coarse = ManualClock::new(0).with_overshoot(Duration::from_millis(29));
        assert!(ScheduleTickProbe::new(Duration::from_millis(20))
            .run(&coarse, &coarse)
            .unwrap_err()
            .is_assertion());
    }

    #[test]
    fn visible_clock_counts_seconds() {
        let clock = SteppedClock::new(0, 10, 1);
        let report = VisibleClockProbe::new(VisibleClockConfig {
            duration: Duration::from_secs(3),
            ..VisibleClockConfig::default()
        })
        .run(&clock)
        .unwrap();
        assert_eq!(report.seconds_printed, 3);
    }

    #[test]
    fn max_sleep_helper_is_interrupted() {
        let clock = ManualClock::new(0);
        MaxSleepProbe::new(MaxSleepConfig::default())
            .run(&clock)
            .unwrap();
    }
}
