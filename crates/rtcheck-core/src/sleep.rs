//! Blocking sleeps, interruptible waits and deadline saturation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Blocks the calling thread for a duration on behalf of a probe.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Host sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How an [`Interrupt::sleep`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// Another thread called [`Interrupt::raise`].
    Interrupted,
}

/// Computes `now + duration`, or `None` when the deadline is not representable.
///
/// `None` means "wait forever": an unrepresentable deadline must never wrap
/// around into the past.
#[inline]
pub fn saturating_deadline(now: Instant, duration: Duration) -> Option<Instant> {
    now.checked_add(duration)
}

/// One-shot interrupt flag that wakes a thread blocked in [`Interrupt::sleep`].
#[derive(Debug, Default)]
pub struct Interrupt {
    raised: Mutex<bool>,
    signal: Condvar,
}

impl Interrupt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.signal.notify_all();
    }

    /// Sleeps for `duration` unless interrupted first. Durations whose deadline
    /// overflows the clock wait until interrupted.
    pub fn sleep(&self, duration: Duration) -> SleepOutcome {
        let deadline = saturating_deadline(Instant::now(), duration);
        let mut raised = self.raised.lock();
        while !*raised {
            match deadline {
                Some(deadline) => {
                    if self.signal.wait_until(&mut raised, deadline).timed_out() {
                        return if *raised {
                            SleepOutcome::Interrupted
                        } else {
                            SleepOutcome::Elapsed
                        };
                    }
                }
                None => self.signal.wait(&mut raised),
            }
        }
        SleepOutcome::Interrupted
    }
}
