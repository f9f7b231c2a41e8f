//! Worker thread state machine
//!
//! The emulator worker moves through `Starting -> Active <-> Paused` and
//! ends in `Stopped`. [`ThreadControl`] wraps the machine in a mutex and a
//! condition variable so a paused worker sleeps until it is resumed or
//! stopped instead of polling.

use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::{EmulatorError, Result};

/// Worker thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    /// Spawned, not yet reading
    Starting,
    /// Reading and answering commands
    Active,
    /// Waiting for resume; input stays queued in the endpoint
    Paused,
    /// Loop finished
    Stopped,
}

impl ThreadState {
    /// Check if the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Check if `to` may follow this state
    pub fn can_transition_to(&self, to: ThreadState) -> bool {
        use ThreadState::*;

        match (*self, to) {
            (_, Stopped) => true,
            (Starting, Active) => true,
            (Active, Paused) => true,
            (Paused, Active) => true,
            _ => false,
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: ThreadState,
    /// New state
    pub to: ThreadState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
}

/// Plain state machine with transition history
#[derive(Debug)]
pub struct ThreadStateMachine {
    state: ThreadState,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for ThreadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadStateMachine {
    /// Create a machine in `Starting`
    pub fn new() -> Self {
        Self {
            state: ThreadState::Starting,
            history: Vec::new(),
            max_history: 100,
        }
    }

    /// Current state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Move to `to`, returning the previous state
    ///
    /// Moving to the current state is a no-op.
    pub fn transition(&mut self, to: ThreadState) -> Result<ThreadState> {
        let from = self.state;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            return Err(EmulatorError::InvalidTransition { from, to });
        }

        self.history.push(StateTransition {
            from,
            to,
            timestamp: Local::now(),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        self.state = to;
        tracing::debug!("Worker state {:?} -> {:?}", from, to);
        Ok(from)
    }
}

/// Thread-safe state machine shared by the worker and its controller
#[derive(Debug, Default)]
pub struct ThreadControl {
    machine: Mutex<ThreadStateMachine>,
    changed: Condvar,
}

impl ThreadControl {
    /// Create a control block in `Starting`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> ThreadState {
        self.machine.lock().state()
    }

    /// Transition and wake every waiter
    pub fn transition(&self, to: ThreadState) -> Result<ThreadState> {
        let previous = self.machine.lock().transition(to)?;
        self.changed.notify_all();
        Ok(previous)
    }

    /// Block while paused; returns the state that ended the wait
    pub fn wait_while_paused(&self) -> ThreadState {
        let mut machine = self.machine.lock();
        while machine.state() == ThreadState::Paused {
            self.changed.wait(&mut machine);
        }
        machine.state()
    }

    /// Block until `target` (or `Stopped`) is reached or `timeout` elapses
    pub fn wait_for(&self, target: ThreadState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut machine = self.machine.lock();
        loop {
            let state = machine.state();
            if state == target {
                return true;
            }
            if state.is_terminal() {
                return false;
            }
            if self.changed.wait_until(&mut machine, deadline).timed_out() {
                return machine.state() == target;
            }
        }
    }

    /// Transition history snapshot
    pub fn history(&self) -> Vec<StateTransition> {
        self.machine.lock().history().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_transitions() {
        let mut sm = ThreadStateMachine::new();
        assert_eq!(sm.state(), ThreadState::Starting);

        sm.transition(ThreadState::Active).unwrap();
        sm.transition(ThreadState::Paused).unwrap();
        sm.transition(ThreadState::Active).unwrap();
        assert_eq!(sm.transition(ThreadState::Stopped).unwrap(), ThreadState::Active);
        assert_eq!(sm.history().len(), 4);
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = ThreadStateMachine::new();
        assert!(sm.transition(ThreadState::Paused).is_err());

        sm.transition(ThreadState::Stopped).unwrap();
        // Stopped is terminal
        assert!(matches!(
            sm.transition(ThreadState::Active),
            Err(EmulatorError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_paused_worker_wakes_on_stop() {
        let control = Arc::new(ThreadControl::new());
        control.transition(ThreadState::Active).unwrap();
        control.transition(ThreadState::Paused).unwrap();

        let worker = {
            let control = control.clone();
            thread::spawn(move || control.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(50));
        control.transition(ThreadState::Stopped).unwrap();

        assert_eq!(worker.join().unwrap(), ThreadState::Stopped);
    }

    #[test]
    fn test_wait_for_timeout() {
        let control = ThreadControl::new();
        assert!(!control.wait_for(ThreadState::Active, Duration::from_millis(20)));
        control.transition(ThreadState::Active).unwrap();
        assert!(control.wait_for(ThreadState::Active, Duration::from_millis(20)));
    }
}
