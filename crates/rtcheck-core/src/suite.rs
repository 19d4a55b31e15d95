//! Runs a selection of probes against one set of capabilities.
//!
//! Probes are independent: each one owns its threads and gate, and its
//! outcome is recorded before the next one starts.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::SuiteConfig;
use crate::error::ProbeError;
use crate::probe::{
    ApplicationTimeProbe, FairnessProbe, MaxSleepProbe, MonotonicProbe, ProbeKind,
    ScheduleTickProbe, SleepAccuracyProbe, TickProbe, VisibleClockProbe,
};
use crate::report::{ProbeOutcome, SuiteReport, Verdict};
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::sleep::{Sleeper, ThreadSleeper};

/// Capabilities of the system under test plus the effective configuration.
#[derive(Clone)]
pub struct ProbeEnv {
    pub clock: Arc<dyn TimeSource>,
    pub sleeper: Arc<dyn Sleeper>,
    pub scheduler: Arc<dyn Scheduler>,
    pub config: SuiteConfig,
}

impl ProbeEnv {
    pub fn new(
        clock: Arc<dyn TimeSource>,
        sleeper: Arc<dyn Sleeper>,
        scheduler: Arc<dyn Scheduler>,
        config: SuiteConfig,
    ) -> Self {
        Self {
            clock,
            sleeper,
            scheduler,
            config,
        }
    }

    /// Host clocks, `thread::sleep` and one OS thread per worker.
    pub fn host(config: SuiteConfig) -> Self {
        Self::new(
            Arc::new(SystemTimeSource::new()),
            Arc::new(ThreadSleeper),
            Arc::new(ThreadScheduler::new()),
            config,
        )
    }
}

fn details<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Runs a single probe and converts its result into an outcome.
pub fn run_probe(kind: ProbeKind, env: &ProbeEnv) -> ProbeOutcome {
    info!("-> Check {kind}: {}...", kind.description());
    let started = Instant::now();
    let config = &env.config;
    let clock = env.clock.as_ref();
    let sleeper = env.sleeper.as_ref();

    let result: Result<Value, (ProbeError, Value)> = match kind {
        ProbeKind::Fairness => {
            let probe = FairnessProbe::new(config.fairness.clone());
            match probe.measure(env.scheduler.as_ref()) {
                Ok(stats) => {
                    let measured = details(&stats);
                    probe
                        .judge(&stats)
                        .map(|()| measured.clone())
                        .map_err(|err| (err, measured))
                }
                Err(err) => Err((err, Value::Null)),
            }
        }
        ProbeKind::Monotonic => MonotonicProbe::new(config.monotonic.clone())
            .run(clock)
            .map(|report| details(&report))
            .map_err(|err| (err, Value::Null)),
        ProbeKind::ClockTick => TickProbe::new(config.tick.clone())
            .run(clock)
            .map(|reports| details(&reports))
            .map_err(|err| (err, Value::Null)),
        ProbeKind::VisibleClock => VisibleClockProbe::new(config.visible_clock.clone())
            .run(clock)
            .map(|report| details(&report))
            .map_err(|err| (err, Value::Null)),
        ProbeKind::SleepAccuracy => SleepAccuracyProbe::new(config.sleep.clone())
            .run(clock, sleeper)
            .map(|report| details(&report))
            .map_err(|err| (err, Value::Null)),
        ProbeKind::ApplicationTime => ApplicationTimeProbe::new(config.application_time.clone())
            .run(clock, sleeper)
            .map(|report| details(&report))
            .map_err(|err| (err, Value::Null)),
        ProbeKind::ScheduleTick => ScheduleTickProbe::new(config.tick.limit)
            .run(clock, sleeper)
            .map(|precision| serde_json::json!({ "precision_ms": precision }))
            .map_err(|err| (err, Value::Null)),
        ProbeKind::MaxSleep => MaxSleepProbe::new(config.max_sleep.clone())
            .run(sleeper)
            .map(|()| Value::Null)
            .map_err(|err| (err, Value::Null)),
    };

    let elapsed = started.elapsed();
    let outcome = match result {
        Ok(measured) => ProbeOutcome::new(kind, Verdict::Passed, measured, elapsed),
        Err((err, measured)) => {
            let verdict = Verdict::from_error(&err);
            if verdict.is_failure() {
                warn!(probe = %kind, error = %err, "probe failed");
            }
            ProbeOutcome::new(kind, verdict, measured, elapsed)
        }
    };
    info!("{outcome}");
    outcome
}

/// An ordered selection of probes sharing one environment.
pub struct Suite {
    env: ProbeEnv,
    probes: Vec<ProbeKind>,
}

impl Suite {
    /// Every probe in default order.
    pub fn new(env: ProbeEnv) -> Self {
        Self {
            env,
            probes: ProbeKind::ALL.to_vec(),
        }
    }

    /// Restricts the run to `probes`, keeping the default order and dropping duplicates.
    pub fn only(mut self, probes: &[ProbeKind]) -> Self {
        self.probes = ProbeKind::ALL
            .into_iter()
            .filter(|kind| probes.contains(kind))
            .collect();
        self
    }

    pub fn probes(&self) -> &[ProbeKind] {
        &self.probes
    }

    pub fn run(&self) -> SuiteReport {
        info!(
            probes = self.probes.len(),
            scheduler = self.env.scheduler.name(),
            cpus = num_cpus::get(),
            "starting validation suite"
        );
        let outcomes = self
            .probes
            .iter()
            .map(|kind| run_probe(*kind, &self.env))
            .collect();
        SuiteReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ManualClock, RoundRobinSim};

    #[test]
    fn only_keeps_default_order() {
        let env = ProbeEnv::host(SuiteConfig::default());
        let suite = Suite::new(env).only(&[
            ProbeKind::ClockTick,
            ProbeKind::Fairness,
            ProbeKind::ClockTick,
        ]);
        assert_eq!(suite.probes(), &[ProbeKind::Fairness, ProbeKind::ClockTick]);
    }

    #[test]
    fn unsupported_probe_is_skipped() {
        let clock = Arc::new(ManualClock::new(0).read_only());
        let env = ProbeEnv::new(
            clock.clone(),
            clock,
            Arc::new(RoundRobinSim::uniform(2, 4)),
            SuiteConfig::default(),
        );
        let outcome = run_probe(ProbeKind::ApplicationTime, &env);
        assert!(matches!(outcome.verdict, Verdict::Skipped { .. }));
    }
}
