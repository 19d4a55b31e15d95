//! Deterministic stand-ins for the clocks and schedulers under test.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::TimeSource;
use crate::error::ProbeError;
use crate::gate::{AbortOnPanic, RunGate};
use crate::scheduler::{Scheduler, Unit, WorkerHandle};
use crate::sleep::Sleeper;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Replays a fixed sequence of samples, one per read on any channel. Once the
/// script is exhausted the last sample repeats.
#[derive(Debug)]
pub struct ScriptedClock {
    samples: Vec<i64>,
    cursor: AtomicUsize,
}

impl ScriptedClock {
    pub fn new(samples: impl Into<Vec<i64>>) -> Self {
        Self {
            samples: samples.into(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    fn next(&self) -> i64 {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.samples
            .get(index)
            .or_else(|| self.samples.last())
            .copied()
            .unwrap_or(0)
    }
}

impl TimeSource for ScriptedClock {
    fn application_millis(&self) -> i64 {
        self.next()
    }

    fn monotonic_millis(&self) -> i64 {
        self.next()
    }

    fn monotonic_nanos(&self) -> i64 {
        self.next()
    }
}

/// Clock that advances by a fixed step every `reads_per_step` reads.
///
/// The millisecond readings move by `step_ms`; the nanosecond reading is the
/// same instant scaled by 1 000 000. Every read on any channel counts.
#[derive(Debug)]
pub struct SteppedClock {
    start_ms: i64,
    step_ms: i64,
    reads_per_step: u64,
    reads: AtomicU64,
    application_offset: AtomicI64,
}

impl SteppedClock {
    pub fn new(start_ms: i64, step_ms: i64, reads_per_step: u64) -> Self {
        Self {
            start_ms,
            step_ms,
            reads_per_step: reads_per_step.max(1),
            reads: AtomicU64::new(0),
            application_offset: AtomicI64::new(0),
        }
    }

    fn now_ms(&self) -> i64 {
        let read = self.reads.fetch_add(1, Ordering::Relaxed);
        let steps = i64::try_from(read / self.reads_per_step).unwrap_or(i64::MAX);
        self.start_ms
            .saturating_add(steps.saturating_mul(self.step_ms))
    }
}

impl TimeSource for SteppedClock {
    fn application_millis(&self) -> i64 {
        self.now_ms()
            .saturating_add(self.application_offset.load(Ordering::Acquire))
    }

    fn monotonic_millis(&self) -> i64 {
        self.now_ms()
    }

    fn monotonic_nanos(&self) -> i64 {
        self.now_ms().saturating_mul(NANOS_PER_MILLI)
    }

    fn set_application_millis(&self, millis: i64) -> Result<(), ProbeError> {
        let current = self.start_ms.saturating_add(
            i64::try_from(self.reads.load(Ordering::Relaxed) / self.reads_per_step)
                .unwrap_or(i64::MAX)
                .saturating_mul(self.step_ms),
        );
        self.application_offset
            .store(millis.saturating_sub(current), Ordering::Release);
        Ok(())
    }
}

/// Virtual clock that only moves when slept on or advanced explicitly.
///
/// Sleeping advances the clock by the requested duration plus a fixed
/// overshoot, which models a late wake-up of the scheduler under test.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
    application_offset: AtomicI64,
    overshoot: Duration,
    settable: bool,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            nanos: AtomicI64::new(start_ms.saturating_mul(NANOS_PER_MILLI)),
            application_offset: AtomicI64::new(0),
            overshoot: Duration::ZERO,
            settable: true,
        }
    }

    pub fn with_overshoot(mut self, overshoot: Duration) -> Self {
        self.overshoot = overshoot;
        self
    }

    /// Makes [`TimeSource::set_application_millis`] report `Unsupported`.
    pub fn read_only(mut self) -> Self {
        self.settable = false;
        self
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(by))
            });
    }
}

impl TimeSource for ManualClock {
    fn application_millis(&self) -> i64 {
        self.monotonic_millis()
            .saturating_add(self.application_offset.load(Ordering::Acquire))
    }

    fn monotonic_millis(&self) -> i64 {
        self.nanos.load(Ordering::Acquire) / NANOS_PER_MILLI
    }

    fn monotonic_nanos(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }

    fn set_application_millis(&self, millis: i64) -> Result<(), ProbeError> {
        if !self.settable {
            return Err(ProbeError::Unsupported("setting the application time"));
        }
        self.application_offset
            .store(millis.saturating_sub(self.monotonic_millis()), Ordering::Release);
        Ok(())
    }
}

impl Sleeper for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.advance(duration.saturating_add(self.overshoot));
    }
}

#[derive(Debug, Default)]
struct Turnstile {
    turn: Mutex<usize>,
    passed: Condvar,
}

impl Turnstile {
    /// Blocks until it is `id`'s turn. Returns `false` once the gate stops.
    fn acquire(&self, id: usize, gate: &RunGate) -> bool {
        let mut turn = self.turn.lock();
        while *turn != id {
            if !gate.is_running() {
                return false;
            }
            self.passed.wait_for(&mut turn, Duration::from_millis(1));
        }
        gate.is_running()
    }

    /// Hands the turn to the next of the `participants` registered workers.
    fn pass(&self, id: usize, participants: usize) {
        let mut turn = self.turn.lock();
        *turn = (id + 1) % participants.max(1);
        self.passed.notify_all();
    }
}

/// Simulated single-core round-robin scheduler.
///
/// Workers are real threads but only the one holding the turnstile runs; it
/// executes its quantum of units and hands the turn to the next worker id. A
/// uniform quantum is perfectly fair up to one slice; unequal quanta model a
/// scheduler that favours some workers.
///
/// Every gate gets a fresh turnstile starting at worker 0, and the rotation
/// covers only the workers registered on that gate, so a session may use
/// fewer workers than there are slots.
#[derive(Debug, Clone)]
pub struct RoundRobinSim {
    quanta: Arc<Vec<u64>>,
    jitter: u64,
    seed: u64,
    session: Arc<Mutex<Option<(Weak<RunGate>, Arc<Turnstile>)>>>,
}

impl RoundRobinSim {
    /// `workers` slots that each run `quantum` units per turn.
    pub fn uniform(workers: usize, quantum: u64) -> Self {
        Self::with_quanta(vec![quantum; workers])
    }

    /// One slot per entry of `quanta`.
    pub fn with_quanta(quanta: Vec<u64>) -> Self {
        Self {
            quanta: Arc::new(quanta.into_iter().map(|q| q.max(1)).collect()),
            jitter: 0,
            seed: 0,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Varies every slice by up to `jitter` units in either direction, drawn
    /// from a generator seeded per worker.
    pub fn with_jitter(mut self, jitter: u64, seed: u64) -> Self {
        self.jitter = jitter;
        self.seed = seed;
        self
    }

    /// Number of slots, i.e. the largest session this scheduler accepts.
    pub fn workers(&self) -> usize {
        self.quanta.len()
    }

    fn turnstile_for(&self, gate: &Arc<RunGate>) -> Arc<Turnstile> {
        let mut session = self.session.lock();
        if let Some((owner, turnstile)) = session.as_ref() {
            if std::ptr::eq(owner.as_ptr(), Arc::as_ptr(gate)) {
                return Arc::clone(turnstile);
            }
        }
        let turnstile = Arc::new(Turnstile::default());
        *session = Some((Arc::downgrade(gate), Arc::clone(&turnstile)));
        turnstile
    }
}

impl Scheduler for RoundRobinSim {
    fn name(&self) -> &str {
        "round-robin-sim"
    }

    fn spawn(&self, id: usize, gate: Arc<RunGate>, mut unit: Unit) -> Result<WorkerHandle, ProbeError> {
        let quantum = *self.quanta.get(id).ok_or_else(|| {
            ProbeError::invalid(format!(
                "simulated scheduler has {} slots, worker {id} requested",
                self.quanta.len()
            ))
        })?;
        let jitter = self.jitter.min(quantum.saturating_sub(1));
        let seed = self.seed.wrapping_add(id as u64);
        let turnstile = self.turnstile_for(&gate);

        let handle = thread::Builder::new()
            .name(format!("rtcheck-sim-{id}"))
            .spawn(move || {
                let _guard = AbortOnPanic(&gate);
                let mut rng = StdRng::seed_from_u64(seed);
                gate.arrive_and_wait()?;
                // Registration is closed once the gate is released.
                let participants = gate.ready();
                let mut counter: u64 = 0;
                while turnstile.acquire(id, &gate) {
                    let slice = if jitter == 0 {
                        quantum
                    } else {
                        rng.gen_range(quantum - jitter..=quantum + jitter)
                    };
                    let mut done = 0;
                    while done < slice && gate.is_running() {
                        unit();
                        counter += 1;
                        done += 1;
                    }
                    turnstile.pass(id, participants);
                }
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

    #[test]
    fn scripted_clock_repeats_last_sample() {
        let clock = ScriptedClock::new(vec![1, 2]);
        assert_eq!(clock.monotonic_millis(), 1);
        assert_eq!(clock.monotonic_millis(), 2);
        assert_eq!(clock.monotonic_millis(), 2);
        assert_eq!(clock.reads(), 3);
    }

    #[test]
    fn stepped_clock_moves_every_n_reads() {
        let clock = SteppedClock::new(1_000, 10, 3);
        let reads: Vec<_> = (0..7).map(|_| clock.monotonic_millis()).collect();
        assert_eq!(reads, vec![1_000, 1_000, 1_000, 1_010, 1_010, 1_010, 1_020]);
    }

    #[test]
    fn manual_clock_sleep_adds_overshoot() {
        let clock = ManualClock::new(0).with_overshoot(Duration::from_millis(3));
        clock.sleep(Duration::from_millis(10));
        assert_eq!(clock.monotonic_millis(), 13);
        assert_eq!(clock.monotonic_nanos(), 13_000_000);
    }

    #[test]
    fn read_only_manual_clock_rejects_set() {
        let clock = ManualClock::new(0).read_only();
        assert!(matches!(
            clock.set_application_millis(5),
            Err(ProbeError::Unsupported(_))
        ));
    }

    #[test]
    fn each_gate_gets_its_own_turnstile() {
        let sim = RoundRobinSim::uniform(2, 8);
        let first = RunGate::new();
        let again = sim.turnstile_for(&first);
        assert!(Arc::ptr_eq(&sim.turnstile_for(&first), &again));
        again.pass(0, 2);
        assert_eq!(*again.turn.lock(), 1);

        let second = RunGate::new();
        let fresh = sim.turnstile_for(&second);
        assert!(!Arc::ptr_eq(&fresh, &again));
        assert_eq!(*fresh.turn.lock(), 0);
    }

    #[test]
    fn round_robin_sim_rejects_unknown_slot() {
        let sim = RoundRobinSim::uniform(2, 8);
        let gate = RunGate::new();
        assert!(matches!(
            sim.spawn(2, gate, Box::new(|| {})),
            Err(ProbeError::InvalidConfig(_))
        ));
    }
}
