//! Clock tick probe: spins on a clock until it changes and checks the step.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::clock::{ClockChannel, TimeSource};
use crate::error::{ensure, ProbeError};
use crate::probe::monotonic::duration_in_units;
use crate::sleep::saturating_deadline;

const SAFETY_CHECK_STRIDE: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickConfig {
    /// Largest accepted clock tick.
    pub limit: Duration,
    /// Host bound on the busy spin.
    pub safety_timeout: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            limit: Duration::from_millis(20),
            safety_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TickMeasurement {
    /// Observed step between two distinct reads.
    Exact(i64),
    /// Two back-to-back reads already differed; the tick is below this value.
    Below(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub channel: ClockChannel,
    pub measurement: TickMeasurement,
    /// Limit expressed in the channel's unit.
    pub limit: i64,
}

fn regression(channel: ClockChannel, sample: u64, previous: i64, current: i64) -> ProbeError {
    ProbeError::ClockRegression {
        channel,
        sample,
        previous,
        current,
    }
}

/// Reads `channel` until it differs from the first read and returns both reads.
/// A read below the first one is a regression, not a tick.
pub fn spin_until_change(
    clock: &dyn TimeSource,
    channel: ClockChannel,
    safety_timeout: Duration,
) -> Result<(i64, i64), ProbeError> {
    let host_start = Instant::now();
    let deadline = saturating_deadline(host_start, safety_timeout);
    let t0 = clock.read(channel);
    let mut spins: u64 = 0;
    loop {
        let t1 = clock.read(channel);
        if t1 < t0 {
            return Err(regression(channel, spins + 2, t0, t1));
        }
        if t1 != t0 {
            return Ok((t0, t1));
        }
        spins += 1;
        if spins % SAFETY_CHECK_STRIDE == 0 {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ProbeError::SafetyTimeout {
                        elapsed: host_start.elapsed(),
                        during: "waiting for the clock to tick",
                    });
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickProbe {
    config: TickConfig,
}

impl TickProbe {
    pub fn new(config: TickConfig) -> Self {
        Self { config }
    }

    pub fn measure(
        &self,
        clock: &dyn TimeSource,
        channel: ClockChannel,
    ) -> Result<TickReport, ProbeError> {
        let unit = channel.unit();
        let limit = duration_in_units(self.config.limit, channel.units_per_milli());

        if channel == ClockChannel::MonotonicNanos {
            let t0 = clock.read(channel);
            let t1 = clock.read(channel);
            if t1 < t0 {
                return Err(regression(channel, 2, t0, t1));
            }
            if t0 != t1 {
                // Reading the clock takes longer than one tick.
                info!("Estimated {channel} clock tick is lower than {} {unit}.", t1 - t0);
                return Ok(TickReport {
                    channel,
                    measurement: TickMeasurement::Below(t1 - t0),
                    limit,
                });
            }
        }

        let (t0, t1) = spin_until_change(clock, channel, self.config.safety_timeout)?;
        let precision = t1 - t0;
        info!("Estimated {channel} clock tick is {precision} {unit}.");
        ensure(precision <= limit, || {
            format!(
                "{channel} timer precision ({precision} {unit}) is lower than the expected limit ({limit} {unit})"
            )
        })?;
        Ok(TickReport {
            channel,
            measurement: TickMeasurement::Exact(precision),
            limit,
        })
    }

    /// Measures the application clock in milliseconds, then the monotonic
    /// clock in nanoseconds.
    pub fn run(&self, clock: &dyn TimeSource) -> Result<Vec<TickReport>, ProbeError> {
        Ok(vec![
            self.measure(clock, ClockChannel::Application)?,
            self.measure(clock, ClockChannel::MonotonicNanos)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ScriptedClock, SteppedClock};

    #[test]
    fn fixed_step_clock_reports_its_step() {
        for step in [1, 5, 20] {
            let clock = SteppedClock::new(0, step, 16);
            let report = TickProbe::new(TickConfig::default())
                .measure(&clock, ClockChannel::Monotonic)
                .unwrap();
            assert_eq!(report.measurement, TickMeasurement::Exact(step));
            assert_eq!(report.limit, 20);
        }
    }

    #[test]
    fn coarse_clock_fails_with_precision_and_limit() {
        let clock = SteppedClock::new(0, 25, 8);
        let err = TickProbe::new(TickConfig::default())
            .measure(&clock, ClockChannel::Monotonic)
            .unwrap_err();
        assert_eq!(
            err,
            ProbeError::Assertion(
                "monotonic time timer precision (25 ms) is lower than the expected limit (20 ms)"
                    .into()
            )
        );
    }

    #[test]
    fn fast_nano_clock_reports_upper_bound() {
        let clock = ScriptedClock::new(vec![1_000, 1_040]);
        let report = TickProbe::new(TickConfig::default())
            .measure(&clock, ClockChannel::MonotonicNanos)
            .unwrap();
        assert_eq!(report.measurement, TickMeasurement::Below(40));
        assert_eq!(report.limit, 20_000_000);
    }

    #[test]
    fn backwards_step_is_a_regression_not_a_tick() {
        let clock = ScriptedClock::new(vec![10, 10, 10, 5]);
        let err = TickProbe::new(TickConfig::default())
            .measure(&clock, ClockChannel::Application)
            .unwrap_err();
        assert_eq!(
            err,
            ProbeError::ClockRegression {
                channel: ClockChannel::Application,
                sample: 4,
                previous: 10,
                current: 5,
            }
        );
        assert!(err.is_assertion());

        let clock = ScriptedClock::new(vec![2_000, 1_500]);
        assert!(matches!(
            TickProbe::new(TickConfig::default()).measure(&clock, ClockChannel::MonotonicNanos),
            Err(ProbeError::ClockRegression { sample: 2, previous: 2_000, current: 1_500, .. })
        ));
    }

    #[test]
    fn slow_nano_clock_is_spun() {
        let clock = SteppedClock::new(0, 2, 8);
        let report = TickProbe::new(TickConfig::default())
            .measure(&clock, ClockChannel::MonotonicNanos)
            .unwrap();
        assert_eq!(report.measurement, TickMeasurement::Exact(2_000_000));
    }

    #[test]
    fn frozen_clock_times_out() {
        let clock = ScriptedClock::new(vec![7]);
        let probe = TickProbe::new(TickConfig {
            limit: Duration::from_millis(20),
            safety_timeout: Duration::from_millis(20),
        });
        assert!(matches!(
            probe.measure(&clock, ClockChannel::Monotonic),
            Err(ProbeError::SafetyTimeout { .. })
        ));
    }
}
