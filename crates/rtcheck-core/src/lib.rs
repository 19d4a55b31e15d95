//! rtcheck core
//! ============
//! Conformance probes for an opaque scheduler and time source: round-robin
//! fairness across equal-priority workers, clock monotonicity, clock tick
//! precision and sleep/clock coherence. The probes only consume the system
//! under test through the [`TimeSource`], [`Sleeper`] and [`Scheduler`]
//! capabilities; [`sim`] provides deterministic stand-ins for all three.

#![cfg_attr(not(test), warn(clippy::pedantic))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod sim;
pub mod sleep;
pub mod suite;

pub use clock::{ClockChannel, SystemTimeSource, TimeSource};
pub use config::{Options, OptionsError, SuiteConfig};
pub use error::ProbeError;
pub use gate::{Phase, RunGate};
pub use probe::{FairnessConfig, FairnessProbe, FairnessStats, ProbeKind};
pub use report::{ProbeOutcome, SuiteReport, Verdict};
pub use scheduler::{Scheduler, ThreadScheduler, Unit, WorkerHandle, WorkerPolicy};
pub use sleep::{Interrupt, SleepOutcome, Sleeper, ThreadSleeper};
pub use suite::{run_probe, ProbeEnv, Suite};
