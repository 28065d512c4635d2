//! Loop state and the cross-thread command handle.
//!
//! # State machine
//!
//! ```text
//! ┌──────┐   run()   ┌─────────┐
//! │ Idle │──────────▶│ Running │◀──┐
//! └──────┘           └────┬────┘   │ resume()
//!                         │        │
//!              pause() or │   ┌────┴───┐
//!            PAUSE record └──▶│ Paused │──┐ step(): one record,
//!                             └────┬───┘◀─┘ stays paused
//!                                  │
//!   stop(), end of run, end of     ▼
//!   source, fatal error       ┌─────────┐
//!   (from any running state)  │ Stopped │
//!                             └─────────┘
//! ```
//!
//! [`LoopControl`] is cheap to clone and may be used from any thread. Commands
//! take effect at the top of the next loop iteration; a paused loop waits on a
//! condition variable, so `resume`, `step` and `stop` wake it immediately.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::debug;

/// Loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Constructed, not started.
    Idle,
    /// Pulling and dispatching records.
    Running,
    /// Not pulling records until resumed or stepped.
    Paused,
    /// Terminated; `end_job` has been dispatched.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Running => write!(f, "running"),
            LoopState::Paused => write!(f, "paused"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Decision taken by the loop before pulling a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Pull normally.
    Run,
    /// Paused, but a single-step permit is available.
    Step,
    /// Paused; nothing to do yet.
    Wait,
}

#[derive(Debug)]
struct Gate {
    state: LoopState,
    paused: bool,
    permits: u32,
}

#[derive(Debug)]
struct Inner {
    stop: AtomicBool,
    gate: Mutex<Gate>,
    changed: Condvar,
}

/// Cloneable handle for commanding a record loop from other threads.
#[derive(Debug, Clone)]
pub struct LoopControl {
    inner: Arc<Inner>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    /// Create a handle in the `Idle` state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stop: AtomicBool::new(false),
                gate: Mutex::new(Gate {
                    state: LoopState::Idle,
                    paused: false,
                    permits: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        self.inner.gate.lock().state
    }

    /// Stop pulling records after the current one.
    pub fn pause(&self) {
        let mut gate = self.inner.gate.lock();
        gate.paused = true;
        if gate.state == LoopState::Running {
            gate.state = LoopState::Paused;
        }
        debug!("Pause requested");
        self.inner.changed.notify_all();
    }

    /// Resume pulling records.
    pub fn resume(&self) {
        let mut gate = self.inner.gate.lock();
        gate.paused = false;
        gate.permits = 0;
        if gate.state == LoopState::Paused {
            gate.state = LoopState::Running;
        }
        debug!("Resume requested");
        self.inner.changed.notify_all();
    }

    /// While paused, allow exactly one more record through. Ignored when the
    /// loop is not paused.
    pub fn step(&self) {
        let mut gate = self.inner.gate.lock();
        if gate.paused {
            gate.permits += 1;
            debug!(permits = gate.permits, "Single step requested");
            self.inner.changed.notify_all();
        }
    }

    /// Terminate the loop. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        // Taking the lock orders the flag with a waiter about to sleep.
        let _gate = self.inner.gate.lock();
        debug!("Stop requested");
        self.inner.changed.notify_all();
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// True while pause is in effect.
    pub fn is_paused(&self) -> bool {
        self.inner.gate.lock().paused
    }

    /// Block until the loop reaches `state` or `timeout` elapses.
    pub fn wait_for(&self, state: LoopState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.inner.gate.lock();
        while gate.state != state {
            if self
                .inner
                .changed
                .wait_until(&mut gate, deadline)
                .timed_out()
            {
                return gate.state == state;
            }
        }
        true
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        let mut gate = self.inner.gate.lock();
        if gate.state != state {
            debug!(from = %gate.state, to = %state, "Loop state change");
            gate.state = state;
            self.inner.changed.notify_all();
        }
    }

    /// Decide whether the loop may pull a record, waiting up to `poll` while
    /// paused.
    pub(crate) fn admit(&self, poll: Duration) -> Admission {
        let mut gate = self.inner.gate.lock();
        if !gate.paused {
            if gate.state == LoopState::Paused {
                gate.state = LoopState::Running;
                self.inner.changed.notify_all();
            }
            return Admission::Run;
        }
        if gate.state == LoopState::Running {
            gate.state = LoopState::Paused;
            self.inner.changed.notify_all();
        }
        if gate.permits > 0 {
            return Admission::Step;
        }
        if self.stop_requested() {
            return Admission::Wait;
        }
        let _ = self.inner.changed.wait_for(&mut gate, poll);
        Admission::Wait
    }

    /// Use up a single-step permit after a stepped record was dispatched.
    pub(crate) fn consume_step(&self) {
        let mut gate = self.inner.gate.lock();
        gate.permits = gate.permits.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pause_resume_cycle_updates_state() {
        let control = LoopControl::new();
        control.set_state(LoopState::Running);
        control.pause();
        assert_eq!(control.state(), LoopState::Paused);
        assert_eq!(control.admit(Duration::from_millis(1)), Admission::Wait);
        control.resume();
        assert_eq!(control.state(), LoopState::Running);
        assert_eq!(control.admit(Duration::from_millis(1)), Admission::Run);
    }

    #[test]
    fn test_step_grants_one_permit_while_paused() {
        let control = LoopControl::new();
        control.step();
        assert_eq!(control.admit(Duration::ZERO), Admission::Run);

        control.pause();
        control.step();
        assert_eq!(control.admit(Duration::ZERO), Admission::Step);
        control.consume_step();
        assert_eq!(control.admit(Duration::ZERO), Admission::Wait);
    }

    #[test]
    fn test_stop_wakes_a_paused_waiter() {
        let control = LoopControl::new();
        control.pause();
        let waiter = {
            let control = control.clone();
            thread::spawn(move || {
                let start = Instant::now();
                while !control.stop_requested() {
                    control.admit(Duration::from_secs(10));
                }
                start.elapsed()
            })
        };
        thread::sleep(Duration::from_millis(20));
        control.stop();
        assert!(waiter.join().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_for_observes_other_thread() {
        let control = LoopControl::new();
        let setter = {
            let control = control.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                control.set_state(LoopState::Stopped);
            })
        };
        assert!(control.wait_for(LoopState::Stopped, Duration::from_secs(5)));
        setter.join().unwrap();
        assert!(!control.wait_for(LoopState::Running, Duration::from_millis(5)));
    }
}
