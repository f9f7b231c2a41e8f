//! Time-gated operations
//!
//! Long ECU operations answer "response pending" until their execution
//! time has elapsed on the monotonic clock, then answer exactly once.

use std::time::{Duration, Instant};

use super::{Task, TaskContext, TaskOutcome};
use crate::core::uds::{self, Nrc};

/// Pending-then-answer task (ECU reset, erase routine)
#[derive(Debug)]
pub struct TimedTask {
    service: u8,
    duration: Duration,
    started: Instant,
    request: Vec<u8>,
}

impl TimedTask {
    /// Create a task for `service` that completes after `duration`
    pub fn new(service: u8, duration: Duration) -> Self {
        Self {
            service,
            duration,
            started: Instant::now(),
            request: Vec::new(),
        }
    }

    /// Time left before the answer is released
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started.elapsed())
    }

    fn poll(&self, cx: &TaskContext<'_>) -> TaskOutcome {
        if Instant::now() >= self.started + self.duration {
            let params = self.request.get(1..).unwrap_or(&[]);
            TaskOutcome::Answer(cx.positive(self.service, params))
        } else {
            tracing::debug!(
                "Service {:02X} pending, {:?} left",
                self.service,
                self.remaining()
            );
            TaskOutcome::Continue(cx.pending(self.service))
        }
    }
}

impl Task for TimedTask {
    fn service_id(&self) -> u8 {
        self.service
    }

    fn start(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        match cx.request() {
            Some(request) if request.first() == Some(&self.service) => {
                tracing::info!(
                    "Starting service {} for {:?}",
                    uds::to_hex(&request),
                    self.duration
                );
                self.request = request;
                self.poll(cx)
            }
            _ => TaskOutcome::Error(Nrc::IncorrectMessageLengthOrFormat),
        }
    }

    fn run(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        self.poll(cx)
    }
}
