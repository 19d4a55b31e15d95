//! Monotonicity probe: polls a clock and fails on the first backwards step.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::clock::{ClockChannel, TimeSource};
use crate::error::ProbeError;
use crate::sleep::saturating_deadline;

/// Host deadline is only checked every this many reads to keep the loop tight.
const SAFETY_CHECK_STRIDE: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonotonicConfig {
    /// Polling window, measured on the clock under test.
    pub duration: Duration,
    /// Period of the progress marker.
    pub heartbeat: Duration,
    /// Extra host time granted before the probe gives up on a stuck clock.
    pub safety_margin: Duration,
    pub channel: ClockChannel,
}

impl Default for MonotonicConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            heartbeat: Duration::from_secs(2),
            safety_margin: Duration::from_secs(30),
            channel: ClockChannel::Monotonic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonotonicReport {
    pub channel: ClockChannel,
    pub samples: u64,
    pub heartbeats: u64,
    pub first: i64,
    pub last: i64,
}

#[derive(Debug, Clone)]
pub struct MonotonicProbe {
    config: MonotonicConfig,
}

impl MonotonicProbe {
    pub fn new(config: MonotonicConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, clock: &dyn TimeSource) -> Result<MonotonicReport, ProbeError> {
        let channel = self.config.channel;
        let units = channel.units_per_milli();
        let window = duration_in_units(self.config.duration, units);
        let period = duration_in_units(self.config.heartbeat, units).max(1);

        info!(
            "Check {channel} consistency for {} seconds...",
            self.config.duration.as_secs()
        );

        let host_start = Instant::now();
        let host_deadline = saturating_deadline(
            host_start,
            self.config.duration.saturating_add(self.config.safety_margin),
        );

        let start = clock.read(channel);
        let end = start.saturating_add(window);
        let mut next_beat = start.saturating_add(period);
        let mut previous = start;
        let mut samples: u64 = 1;
        let mut heartbeats: u64 = 0;

        loop {
            let current = clock.read(channel);
            samples += 1;
            if end <= current {
                previous = current;
                break;
            }
            if next_beat < current {
                heartbeats += 1;
                info!(target: "rtcheck::heartbeat", elapsed = current - start, ".");
                next_beat = current.saturating_add(period);
            }
            if current < previous {
                return Err(ProbeError::ClockRegression {
                    channel,
                    sample: samples,
                    previous,
                    current,
                });
            }
            previous = current;

            if samples % SAFETY_CHECK_STRIDE == 0 {
                if let Some(deadline) = host_deadline {
                    if Instant::now() >= deadline {
                        return Err(ProbeError::SafetyTimeout {
                            elapsed: host_start.elapsed(),
                            during: "polling the clock for regressions",
                        });
                    }
                }
            }
        }

        Ok(MonotonicReport {
            channel,
            samples,
            heartbeats,
            first: start,
            last: previous,
        })
    }
}

pub(crate) fn duration_in_units(duration: Duration, units_per_milli: i64) -> i64 {
    i64::try_from(duration.as_millis())
        .unwrap_or(i64::MAX)
        .saturating_mul(units_per_milli)
}
