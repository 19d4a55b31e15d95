//! Time source capability consumed by the clock probes.
//!
//! A time source exposes three readings: a settable application clock and a
//! platform monotonic clock in milliseconds and nanoseconds. Probes only read
//! them; they never own or initialise the clock.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::ProbeError;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Selects which reading of a [`TimeSource`] a probe polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockChannel {
    Application,
    Monotonic,
    MonotonicNanos,
}

impl ClockChannel {
    /// Number of channel units in one millisecond.
    #[inline]
    pub const fn units_per_milli(self) -> i64 {
        match self {
            ClockChannel::Application | ClockChannel::Monotonic => 1,
            ClockChannel::MonotonicNanos => NANOS_PER_MILLI,
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            ClockChannel::Application | ClockChannel::Monotonic => "ms",
            ClockChannel::MonotonicNanos => "ns",
        }
    }
}

impl fmt::Display for ClockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClockChannel::Application => "application time",
            ClockChannel::Monotonic => "monotonic time",
            ClockChannel::MonotonicNanos => "monotonic nano time",
        };
        f.write_str(label)
    }
}

/// Read-only access to the clocks of the system under test.
pub trait TimeSource: Send + Sync {
    /// Application wall clock in milliseconds. May be moved by
    /// [`TimeSource::set_application_millis`].
    fn application_millis(&self) -> i64;

    /// Platform monotonic time in milliseconds.
    fn monotonic_millis(&self) -> i64;

    /// Platform monotonic time in nanoseconds.
    fn monotonic_nanos(&self) -> i64;

    /// Moves the application clock. The monotonic readings must not be affected.
    fn set_application_millis(&self, _millis: i64) -> Result<(), ProbeError> {
        Err(ProbeError::Unsupported("setting the application time"))
    }

    #[inline]
    fn read(&self, channel: ClockChannel) -> i64 {
        match channel {
            ClockChannel::Application => self.application_millis(),
            ClockChannel::Monotonic => self.monotonic_millis(),
            ClockChannel::MonotonicNanos => self.monotonic_nanos(),
        }
    }
}

/// Host clocks: `Instant` for the monotonic readings, anchored to the wall
/// clock at construction so both start out aligned.
#[derive(Debug)]
pub struct SystemTimeSource {
    anchor: Instant,
    anchor_wall_millis: i64,
    application_offset: AtomicI64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        let anchor_wall_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            anchor: Instant::now(),
            anchor_wall_millis,
            application_offset: AtomicI64::new(0),
        }
    }

    fn elapsed_nanos(&self) -> i64 {
        i64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn application_millis(&self) -> i64 {
        self.monotonic_millis()
            .saturating_add(self.application_offset.load(Ordering::Acquire))
    }

    fn monotonic_millis(&self) -> i64 {
        self.anchor_wall_millis
            .saturating_add(self.elapsed_nanos() / NANOS_PER_MILLI)
    }

    fn monotonic_nanos(&self) -> i64 {
        self.anchor_wall_millis
            .saturating_mul(NANOS_PER_MILLI)
            .saturating_add(self.elapsed_nanos())
    }

    fn set_application_millis(&self, millis: i64) -> Result<(), ProbeError> {
        let offset = millis.saturating_sub(self.monotonic_millis());
        self.application_offset.store(offset, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_scale_to_milliseconds() {
        assert_eq!(ClockChannel::Monotonic.units_per_milli(), 1);
        assert_eq!(ClockChannel::MonotonicNanos.units_per_milli(), 1_000_000);
        assert_eq!(ClockChannel::MonotonicNanos.unit(), "ns");
    }

    #[test]
    fn system_clock_readings_start_aligned() {
        let clock = SystemTimeSource::new();
        let millis = clock.monotonic_millis();
        let application = clock.application_millis();
        let nanos_as_millis = clock.monotonic_nanos() / NANOS_PER_MILLI;
        assert!(application - millis <= 1);
        assert!(nanos_as_millis - millis <= 1);
    }

    #[test]
    fn setting_application_time_leaves_monotonic_untouched() {
        let clock = SystemTimeSource::new();
        let before = clock.monotonic_millis();
        clock
            .set_application_millis(before + 50_000)
            .expect("system clock is settable");
        assert!(clock.application_millis() >= before + 50_000);
        assert!(clock.monotonic_millis() < before + 1_000);
    }
}
