pub mod fairness;
pub mod monotonic;
pub mod tick;
pub mod timing;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub use fairness::{FairnessConfig, FairnessProbe, FairnessStats};
pub use monotonic::{MonotonicConfig, MonotonicProbe, MonotonicReport};
pub use tick::{TickConfig, TickMeasurement, TickProbe, TickReport};
pub use timing::{
    ApplicationTimeProbe, MaxSleepProbe, ScheduleTickProbe, SleepAccuracyProbe, VisibleClockProbe,
};

/// Every probe the suite knows how to run, in default execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    VisibleClock,
    SleepAccuracy,
    ApplicationTime,
    Fairness,
    MaxSleep,
    Monotonic,
    ClockTick,
    ScheduleTick,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 8] = [
        ProbeKind::VisibleClock,
        ProbeKind::SleepAccuracy,
        ProbeKind::ApplicationTime,
        ProbeKind::Fairness,
        ProbeKind::MaxSleep,
        ProbeKind::Monotonic,
        ProbeKind::ClockTick,
        ProbeKind::ScheduleTick,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ProbeKind::VisibleClock => "visible-clock",
            ProbeKind::SleepAccuracy => "sleep-accuracy",
            ProbeKind::ApplicationTime => "application-time",
            ProbeKind::Fairness => "fairness",
            ProbeKind::MaxSleep => "max-sleep",
            ProbeKind::Monotonic => "monotonic",
            ProbeKind::ClockTick => "clock-tick",
            ProbeKind::ScheduleTick => "schedule-tick",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            ProbeKind::VisibleClock => "application clock advances and agrees with the monotonic clock",
            ProbeKind::SleepAccuracy => "a timed sleep lasts at least its delay and at most one tick more",
            ProbeKind::ApplicationTime => "moving the application clock leaves the monotonic clock alone",
            ProbeKind::Fairness => "equal-priority workers get an equal share of the processor",
            ProbeKind::MaxSleep => "sleeping for the maximum duration neither overflows nor hangs",
            ProbeKind::Monotonic => "successive clock reads never go backwards",
            ProbeKind::ClockTick => "the clock tick is below the configured limit",
            ProbeKind::ScheduleTick => "timed wake-ups happen with tick granularity",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ProbeKind::ALL
            .into_iter()
            .find(|kind| kind.name() == value)
            .ok_or_else(|| format!("unknown probe `{value}`"))
    }
}
