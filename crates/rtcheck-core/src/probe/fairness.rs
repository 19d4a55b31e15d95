//! Round-robin fairness probe.
//!
//! Spawns N equal-priority workers through a [`Scheduler`], releases them at
//! once, lets them spin for the configured window and compares how many
//! units each one executed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ensure, ProbeError};
use crate::gate::RunGate;
use crate::scheduler::{Scheduler, Unit, WorkerHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairnessConfig {
    pub workers: usize,
    pub duration: Duration,
    /// Minimum number of units every worker must have executed.
    pub min_counter: u64,
    /// Largest accepted `(max - min) * 100 / min`.
    pub max_imbalance_pct: u64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            duration: Duration::from_secs(10),
            min_counter: 500,
            max_imbalance_pct: 5,
        }
    }
}

impl FairnessConfig {
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.workers < 2 {
            return Err(ProbeError::invalid(format!(
                "fairness needs at least 2 workers, got {}",
                self.workers
            )));
        }
        Ok(())
    }
}

/// Imbalance between the slowest and the fastest worker, in percent of the
/// slowest. A worker that never ran counts as 100 %.
#[inline]
pub fn imbalance_pct(min: u64, max: u64) -> u64 {
    if min > 0 {
        max.saturating_sub(min).saturating_mul(100) / min
    } else {
        100
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FairnessStats {
    pub counters: Vec<u64>,
    pub min: u64,
    pub max: u64,
    pub average: u64,
    pub delta: u64,
    pub imbalance_pct: u64,
}

impl FairnessStats {
    pub fn from_counters(counters: Vec<u64>) -> Self {
        let min = counters.iter().copied().min().unwrap_or(0);
        let max = counters.iter().copied().max().unwrap_or(0);
        let total = counters
            .iter()
            .fold(0u64, |acc, counter| acc.saturating_add(*counter));
        let average = total / (counters.len().max(1) as u64);
        Self {
            min,
            max,
            average,
            delta: max - min,
            imbalance_pct: imbalance_pct(min, max),
            counters,
        }
    }

    /// Applies both thresholds, the minimum counter first.
    pub fn check(&self, config: &FairnessConfig) -> Result<(), ProbeError> {
        ensure(self.min >= config.min_counter, || {
            format!(
                "counter increments < {} (actually {})",
                config.min_counter, self.min
            )
        })?;
        ensure(self.imbalance_pct <= config.max_imbalance_pct, || {
            format!(
                "delta percentage > {} (actually {})",
                config.max_imbalance_pct, self.imbalance_pct
            )
        })
    }
}

fn spin_unit() -> Unit {
    Box::new(|| {
        std::hint::black_box(());
    })
}

/// Joins every handle, even after a failure, and returns the first error.
fn join_all(handles: Vec<WorkerHandle>) -> Result<Vec<u64>, ProbeError> {
    let mut counters = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        let id = handle.id();
        match handle.join() {
            Ok(counter) => counters.push(counter),
            Err(err) => {
                warn!(worker = id, error = %err, "worker did not finish cleanly");
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(counters),
    }
}

#[derive(Debug, Clone)]
pub struct FairnessProbe {
    config: FairnessConfig,
}

impl FairnessProbe {
    pub fn new(config: FairnessConfig) -> Self {
        Self { config }
    }

    /// Runs one session and returns the raw statistics without judging them.
    pub fn measure(&self, scheduler: &dyn Scheduler) -> Result<FairnessStats, ProbeError> {
        self.config.validate()?;
        let workers = self.config.workers;
        let gate = RunGate::new();

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            match scheduler.spawn(id, Arc::clone(&gate), spin_unit()) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    gate.abort();
                    let _ = join_all(handles);
                    return Err(err);
                }
            }
        }

        if let Err(err) = gate.wait_until_ready(workers) {
            gate.abort();
            let _ = join_all(handles);
            return Err(err);
        }

        info!(
            scheduler = scheduler.name(),
            "Starting {workers} tasks and wait for {} seconds...",
            self.config.duration.as_secs_f32()
        );
        gate.release()?;
        let held = gate.hold(self.config.duration);
        gate.stop();
        let counters = join_all(handles)?;
        held?;
        info!("...done.");

        Ok(FairnessStats::from_counters(counters))
    }

    /// Applies the thresholds, logging the full statistics when the
    /// imbalance is exceeded.
    pub fn judge(&self, stats: &FairnessStats) -> Result<(), ProbeError> {
        if stats.imbalance_pct > self.config.max_imbalance_pct {
            warn!(
                "Min counter = {}, Max counter = {}, Average = {}, Delta = {}, Delta Percentage = {}",
                stats.min, stats.max, stats.average, stats.delta, stats.imbalance_pct
            );
        }
        stats.check(&self.config)
    }

    /// Runs one session and applies the thresholds.
    pub fn run(&self, scheduler: &dyn Scheduler) -> Result<FairnessStats, ProbeError> {
        let stats = self.measure(scheduler)?;
        self.judge(&stats)?;
        Ok(stats)
    }
}
