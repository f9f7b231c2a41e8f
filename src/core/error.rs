//! Error types shared by the emulator core

use thiserror::Error;

use super::state_machine::ThreadState;

/// Emulator error types
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// Scenario name not present in the rule registry
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Rule pattern failed to compile
    #[error("Invalid pattern for rule {rule}: {source}")]
    InvalidPattern {
        /// Rule id
        rule: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// Scenario file could not be parsed or resolved
    #[error("Scenario file error: {0}")]
    ScenarioFile(String),

    /// Named action is not registered
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Thread state transition not allowed
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: ThreadState,
        /// Requested state
        to: ThreadState,
    },

    /// Emulator already running
    #[error("Emulator already started")]
    AlreadyStarted,

    /// Virtual port creation failed
    #[error("Virtual port error: {0}")]
    VirtualPort(String),

    /// Memory backing could not be opened
    #[error(transparent)]
    Memory(#[from] super::task::MemoryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
