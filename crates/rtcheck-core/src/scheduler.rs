//! Scheduler capability: runs equal-priority workers on behalf of a probe.
//!
//! A scheduler only receives a zero-argument unit of work. Each worker parks
//! on the [`RunGate`] until released, invokes the unit repeatedly while the
//! gate is running and returns how many times it did so. The count lives on
//! the worker's own stack, so counters never share a cache line.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::gate::{AbortOnPanic, RunGate};

/// One step of work executed per loop iteration of a worker.
pub type Unit = Box<dyn FnMut() + Send + 'static>;

/// Joinable worker returning its frozen invocation counter.
pub struct WorkerHandle {
    id: usize,
    inner: JoinHandle<Result<u64, ProbeError>>,
}

impl WorkerHandle {
    pub fn new(id: usize, inner: JoinHandle<Result<u64, ProbeError>>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker to exit and returns its counter.
    pub fn join(self) -> Result<u64, ProbeError> {
        let id = self.id;
        self.inner
            .join()
            .map_err(|_| ProbeError::WorkerPanicked(id))?
    }
}

pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Starts worker `id` at the common priority. The worker must register on
    /// `gate` before running `unit`.
    fn spawn(&self, id: usize, gate: Arc<RunGate>, unit: Unit) -> Result<WorkerHandle, ProbeError>;
}

/// Where and how OS worker threads run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerPolicy {
    /// Pin every worker to this core so the OS has to time-slice them.
    pub pin_core: Option<usize>,
    /// Run workers under `SCHED_RR` with this priority (Linux only).
    pub rr_priority: Option<i32>,
}

impl WorkerPolicy {
    fn apply(&self, id: usize) {
        if let Some(core) = self.pin_core {
            pin_current_thread_to(id, core);
        }
        if let Some(priority) = self.rr_priority {
            enter_round_robin(id, priority);
        }
    }
}

#[cfg(feature = "affinity")]
fn pin_current_thread_to(id: usize, core: usize) {
    match core_affinity::get_core_ids() {
        Some(ids) if !ids.is_empty() => {
            let target = ids.get(core).copied().unwrap_or(ids[core % ids.len()]);
            if !core_affinity::set_for_current(target) {
                warn!(worker = id, core, "failed to pin worker thread");
            }
        }
        _ => warn!(worker = id, core, "no core ids reported; worker left unpinned"),
    }
}

#[cfg(not(feature = "affinity"))]
fn pin_current_thread_to(id: usize, core: usize) {
    warn!(
        worker = id,
        core, "core pinning requested but rtcheck was built without the `affinity` feature"
    );
}

#[cfg(target_os = "linux")]
fn enter_round_robin(id: usize, priority: i32) {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 targets the calling thread and `param` outlives the call.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_RR, &param) };
    if rc != 0 {
        warn!(
            worker = id,
            priority,
            err = %std::io::Error::last_os_error(),
            "SCHED_RR unavailable; worker keeps the default policy"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn enter_round_robin(id: usize, priority: i32) {
    warn!(worker = id, priority, "SCHED_RR is only supported on Linux");
}

/// Host scheduler: one OS thread per worker.
#[derive(Debug, Clone, Default)]
pub struct ThreadScheduler {
    policy: WorkerPolicy,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: WorkerPolicy) -> Self {
        Self { policy }
    }
}

impl Scheduler for ThreadScheduler {
    fn name(&self) -> &str {
        "os-threads"
    }

    fn spawn(&self, id: usize, gate: Arc<RunGate>, mut unit: Unit) -> Result<WorkerHandle, ProbeError> {
        let policy = self.policy.clone();
        let handle = thread::Builder::new()
            .name(format!("rtcheck-worker-{id}"))
            .spawn(move || {
                let _guard = AbortOnPanic(&gate);
                policy.apply(id);
                debug!(worker = id, "waiting for start");
                gate.arrive_and_wait()?;
                let mut counter: u64 = 0;
                while gate.is_running() {
                    unit();
                    counter += 1;
                }
                debug!(worker = id, counter, "worker ends");
                Ok(counter)
            })
            .map_err(|err| ProbeError::Spawn {
                worker: id,
                reason: err.to_string(),
            })?;
        Ok(WorkerHandle::new(id, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn thread_workers_count_their_own_steps() {
        let scheduler = ThreadScheduler::new();
        let gate = RunGate::new();
        let handles: Vec<_> = (0..2)
            .map(|id| {
                scheduler
                    .spawn(id, Arc::clone(&gate), Box::new(|| {}))
                    .expect("spawn worker")
            })
            .collect();

        gate.wait_until_ready(2).unwrap();
        gate.release().unwrap();
        thread::sleep(Duration::from_millis(20));
        gate.stop();

        for handle in handles {
            assert!(handle.join().unwrap() > 0);
        }
    }

    #[test]
    fn panicking_unit_is_reported_and_aborts_gate() {
        let scheduler = ThreadScheduler::new();
        let gate = RunGate::new();
        let handle = scheduler
            .spawn(7, Arc::clone(&gate), Box::new(|| panic!("unit failed")))
            .unwrap();
        gate.wait_until_ready(1).unwrap();
        gate.release().unwrap();

        assert_eq!(handle.join(), Err(ProbeError::WorkerPanicked(7)));
        assert_eq!(gate.phase(), crate::gate::Phase::Aborted);
    }
}
