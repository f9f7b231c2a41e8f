//! Session fields owned by the dispatch engine

use std::time::Duration;

use super::rules::DEFAULT_SCENARIO;

/// Default inter-byte request timeout (24 minutes, as on the real adapter)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1440);

/// Reset kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Clear adapter flags only (ATZ, ATWS, ATD)
    Soft,
    /// Also restore scenario, delay and every counter
    Full,
}

/// Scalar session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Selected scenario
    pub scenario: String,
    /// Delay applied before every response
    pub delay: Duration,
    /// Inter-byte timeout after which a partial command is discarded
    pub request_timeout: Duration,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            scenario: DEFAULT_SCENARIO.to_string(),
            delay: Duration::ZERO,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SessionState {
    /// Apply a full reset to the scalar fields
    pub fn full_reset(&mut self) {
        self.scenario = DEFAULT_SCENARIO.to_string();
        self.delay = Duration::ZERO;
    }
}
