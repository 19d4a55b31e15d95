//! Release/stop barrier shared by the controller and its workers.
//!
//! The gate moves `Idle -> Running -> Stopped` exactly once. Workers register
//! as ready and block while the gate is idle; the controller waits for all of
//! them before releasing, so no worker gets a head start. `Aborted` is a
//! terminal state that wakes every blocked party with an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::ProbeError;
use crate::sleep::saturating_deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
    Aborted,
}

#[derive(Debug)]
struct GateState {
    phase: Phase,
    ready: usize,
}

#[derive(Debug)]
pub struct RunGate {
    state: Mutex<GateState>,
    changed: Condvar,
    running: AtomicBool,
}

impl RunGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState {
                phase: Phase::Idle,
                ready: 0,
            }),
            changed: Condvar::new(),
            running: AtomicBool::new(false),
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Number of workers that reported ready so far.
    pub fn ready(&self) -> usize {
        self.state.lock().ready
    }

    /// Fast-path check polled by workers in their tight loop.
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Worker side: reports ready, then blocks until the gate leaves `Idle`.
    pub fn arrive_and_wait(&self) -> Result<(), ProbeError> {
        let mut state = self.state.lock();
        state.ready += 1;
        self.changed.notify_all();
        while state.phase == Phase::Idle {
            self.changed.wait(&mut state);
        }
        match state.phase {
            Phase::Aborted => Err(ProbeError::Interrupted("waiting for release")),
            _ => Ok(()),
        }
    }

    /// Controller side: blocks until `expected` workers are parked on the gate.
    pub fn wait_until_ready(&self, expected: usize) -> Result<(), ProbeError> {
        let mut state = self.state.lock();
        while state.ready < expected && state.phase != Phase::Aborted {
            self.changed.wait(&mut state);
        }
        if state.phase == Phase::Aborted {
            return Err(ProbeError::Interrupted("waiting for workers to be ready"));
        }
        Ok(())
    }

    /// Broadcasts the start signal. Only valid once, from `Idle`.
    pub fn release(&self) -> Result<(), ProbeError> {
        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            return Err(ProbeError::invalid(format!(
                "gate cannot be released from {:?}",
                state.phase
            )));
        }
        state.phase = Phase::Running;
        self.running.store(true, Ordering::Release);
        self.changed.notify_all();
        Ok(())
    }

    /// Blocks the controller for the run window. Returns early with an error
    /// only if the gate is aborted meanwhile.
    pub fn hold(&self, window: Duration) -> Result<(), ProbeError> {
        let deadline = saturating_deadline(Instant::now(), window);
        let mut state = self.state.lock();
        loop {
            if state.phase == Phase::Aborted {
                return Err(ProbeError::Interrupted("waiting for the run window"));
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return if state.phase == Phase::Aborted {
                            Err(ProbeError::Interrupted("waiting for the run window"))
                        } else {
                            Ok(())
                        };
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    /// Raises the stop flag. Idempotent; does not override an abort.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.phase != Phase::Aborted {
            state.phase = Phase::Stopped;
        }
        self.running.store(false, Ordering::Release);
        self.changed.notify_all();
    }

    /// Tears the session down and wakes every waiter with an error.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Aborted;
        self.running.store(false, Ordering::Release);
        self.changed.notify_all();
    }
}

/// Aborts the gate if the owning worker unwinds.
pub(crate) struct AbortOnPanic<'a>(pub(crate) &'a RunGate);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn release_is_exactly_once() {
        let gate = RunGate::new();
        gate.release().unwrap();
        assert!(gate.is_running());
        assert!(matches!(gate.release(), Err(ProbeError::InvalidConfig(_))));
        gate.stop();
        assert!(!gate.is_running());
        assert_eq!(gate.phase(), Phase::Stopped);
    }

    #[test]
    fn workers_block_until_release() {
        let gate = RunGate::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.arrive_and_wait())
            })
            .collect();

        gate.wait_until_ready(3).unwrap();
        assert_eq!(gate.ready(), 3);
        assert_eq!(gate.phase(), Phase::Idle);
        gate.release().unwrap();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn abort_wakes_waiting_workers_with_error() {
        let gate = RunGate::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.arrive_and_wait())
        };
        gate.wait_until_ready(1).unwrap();
        gate.abort();
        assert_eq!(
            waiter.join().unwrap(),
            Err(ProbeError::Interrupted("waiting for release"))
        );
        assert!(gate.wait_until_ready(2).is_err());
    }

    #[test]
    fn hold_returns_after_window() {
        let gate = RunGate::new();
        gate.release().unwrap();
        let start = Instant::now();
        gate.hold(Duration::from_millis(30)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn hold_is_cut_short_by_abort() {
        let gate = RunGate::new();
        gate.release().unwrap();
        let aborter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                gate.abort();
            })
        };
        assert!(matches!(
            gate.hold(Duration::from_secs(30)),
            Err(ProbeError::Interrupted(_))
        ));
        aborter.join().unwrap();
    }
}
