//! # Elmulator Core Library
//!
//! An ELM327-class OBD-II/UDS adapter emulator on a virtual serial port:
//! - Regex rules grouped in scenarios, with priorities and header filters
//! - Per-session counters driving sequences and adapter flags
//! - Long-running UDS tasks (ECU reset, security access, memory access)
//! - ISO-TP aware response rendering
//! - PTY endpoint for real diagnostic clients, loopback for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use elmulator_core::{Emulator, Engine, TaskSettings};
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::builtin(&TaskSettings::default())?;
//!     let mut emulator = Emulator::new(engine);
//!     let path = emulator.start_pty()?;
//!     println!("Connect your client to {}", path);
//!
//!     emulator.set_scenario("engineoff")?;
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     emulator.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::EmulatorConfig;
pub use crate::core::actions::{ActionRegistry, ScenarioFile};
pub use crate::core::counters::{CounterValue, Counters};
pub use crate::core::engine::Engine;
pub use crate::core::error::{EmulatorError, Result};
pub use crate::core::logger::{LogFormat, SharedTrafficLogger, TrafficLogger};
pub use crate::core::rules::{Effect, Rule, RuleRegistry};
pub use crate::core::session::ResetKind;
pub use crate::core::state_machine::ThreadState;
pub use crate::core::task::{Task, TaskOutcome, TaskRegistry, TaskSettings};
pub use crate::core::transport::{Emulator, TransportSettings};
pub use crate::core::virtual_port::{loopback_pair, Endpoint, LoopbackClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
