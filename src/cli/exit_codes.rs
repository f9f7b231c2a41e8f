//! CLI Exit Codes
//!
//! Exit codes reported by the `elmulator` binary.

use crate::core::error::EmulatorError;
use crate::core::task::MemoryError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Virtual port could not be created
    pub const PORT_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Scenario file or rule error
    pub const SCENARIO_ERROR: u8 = 9;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn io_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        _ => ExitCodes::ERROR,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_code(&err), err.to_string())
    }
}

impl From<&EmulatorError> for CliResult {
    fn from(err: &EmulatorError) -> Self {
        let code = match err {
            EmulatorError::UnknownScenario(_) => ExitCodes::INVALID_ARGS,
            EmulatorError::InvalidPattern { .. }
            | EmulatorError::ScenarioFile(_)
            | EmulatorError::UnknownAction(_) => ExitCodes::SCENARIO_ERROR,
            EmulatorError::VirtualPort(_) => ExitCodes::PORT_FAILED,
            EmulatorError::Memory(MemoryError::Io(e)) | EmulatorError::Io(e) => io_code(e),
            EmulatorError::Memory(_) => ExitCodes::CONFIG_ERROR,
            EmulatorError::InvalidTransition { .. } | EmulatorError::AlreadyStarted => {
                ExitCodes::INTERNAL_ERROR
            }
        };
        Self::Error(code, err.to_string())
    }
}

impl From<anyhow::Error> for CliResult {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        if let Some(e) = err.downcast_ref::<EmulatorError>() {
            return Self::Error(Self::from(e).code(), message);
        }
        if let Some(e) = err.downcast_ref::<std::io::Error>() {
            return Self::Error(io_code(e), message);
        }
        Self::Error(ExitCodes::ERROR, message)
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Virtual port creation failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Scenario error",
        127 => "Internal error",
        _ => "Unknown error",
    }
}
