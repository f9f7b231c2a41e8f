//! Stateful protocol tasks
//!
//! A task replaces a static rule response when an exchange spans several
//! commands: response-pending sequences, multi-frame transfers, the
//! security seed/key handshake and memory access by address.
//!
//! The engine creates a task on the first match of a task-bound rule and
//! calls [`Task::start`]; later matches of the same rule call [`Task::run`]
//! until the task answers, fails or terminates.

mod isotp;
mod memory;
mod pending;
mod security;

pub use isotp::{Assembly, FrameAssembler};
pub use memory::{MemoryError, MemorySettings, MemoryStore, ReadMemory, SharedStore, WriteMemory};
pub use pending::TimedTask;
pub use security::SecurityAccess;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::counters::{self, Counters};
use super::uds::{self, service_id, Nrc};

/// Result of one task step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Final response; the task is disposed
    Answer(String),
    /// Interim response (may be empty); the task waits for the next command
    Continue(String),
    /// Negative response with this code; the task is disposed
    Error(Nrc),
    /// Dispose silently
    Terminate,
}

impl TaskOutcome {
    /// True when the task stays alive
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// State shared between task instances
#[derive(Debug, Clone, Default)]
pub struct SharedTaskState {
    /// Seed issued by the last seed request
    pub seed: Option<Vec<u8>>,
    /// Set once a key matched the issued seed
    pub security_unlocked: bool,
    values: HashMap<String, String>,
}

impl SharedTaskState {
    /// Free-form value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store a free-form value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }
}

/// What a task sees of the engine for one step
pub struct TaskContext<'a> {
    /// Sanitized command
    pub cmd: &'a str,
    /// Rule the task is bound to
    pub rule_id: &'a str,
    /// Session counters
    pub counters: &'a mut Counters,
    /// Cross-task state
    pub shared: &'a mut SharedTaskState,
}

impl TaskContext<'_> {
    /// Command bytes, if the command is valid hex
    pub fn request(&self) -> Option<Vec<u8>> {
        uds::parse_hex(self.cmd)
    }

    /// Header the emulated ECU answers on
    pub fn response_header(&self) -> String {
        let request = self
            .counters
            .text(counters::HEADER)
            .unwrap_or_else(|| counters::DEFAULT_HEADER.to_string());
        uds::response_header(&request)
    }

    /// True when the adapter adds PCI bytes itself (ATCAF1)
    pub fn can_auto_format(&self) -> bool {
        self.counters.flag(counters::CAN_AUTO_FORMAT, true)
    }

    /// Frame markup for a raw payload
    pub fn frame(&self, payload: &[u8]) -> String {
        uds::frame(&self.response_header(), payload)
    }

    /// Positive response frame
    pub fn positive(&self, service: u8, data: &[u8]) -> String {
        self.frame(&uds::positive_response(service, data))
    }

    /// Negative response frame
    pub fn negative(&self, service: u8, nrc: Nrc) -> String {
        self.frame(&uds::negative_response(service, nrc))
    }

    /// Response-pending frame (`7F <sid> 78`)
    pub fn pending(&self, service: u8) -> String {
        self.negative(service, Nrc::ResponsePending)
    }
}

/// A stateful handler bound to a rule
pub trait Task: Send {
    /// Service answered in negative responses
    fn service_id(&self) -> u8;

    /// First command for this instance
    fn start(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        self.run(cx)
    }

    /// Every following command matched by the bound rule
    fn run(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome;
}

/// Task constructor
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Task timing and resource settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// ECU reset execution time
    pub ecu_reset_ms: u64,
    /// Erase routine execution time
    pub erase_ms: u64,
    /// Seed generation time
    pub security_ms: u64,
    /// Seed/key secret as hex
    pub security_secret: String,
    /// Memory emulation
    pub memory: MemorySettings,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            ecu_reset_ms: 500,
            erase_ms: 2000,
            security_ms: 200,
            security_secret: "FF".to_string(),
            memory: MemorySettings::default(),
        }
    }
}

/// Name to constructor map
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in tasks: `ecu_reset`, `erase_memory`, `security_access`,
    /// `read_memory`, `write_memory`
    pub fn builtin(settings: &TaskSettings) -> Result<Self, MemoryError> {
        let mut registry = Self::new();

        let reset = Duration::from_millis(settings.ecu_reset_ms);
        registry.register("ecu_reset", move || {
            Box::new(TimedTask::new(service_id::ECU_RESET, reset))
        });

        let erase = Duration::from_millis(settings.erase_ms);
        registry.register("erase_memory", move || {
            Box::new(TimedTask::new(service_id::ROUTINE_CONTROL, erase))
        });

        let secret = uds::parse_hex(&settings.security_secret)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| vec![0xFF]);
        let delay = Duration::from_millis(settings.security_ms);
        registry.register("security_access", move || {
            Box::new(SecurityAccess::new(secret.clone(), delay))
        });

        let store = Arc::new(Mutex::new(MemoryStore::open(&settings.memory)?));
        let read_store = store.clone();
        registry.register("read_memory", move || Box::new(ReadMemory::new(read_store.clone())));
        registry.register("write_memory", move || Box::new(WriteMemory::new(store.clone())));

        Ok(registry)
    }

    /// Register or replace a task constructor
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Construct a task by name
    pub fn create(&self, name: &str) -> Option<Box<dyn Task>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// True when `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
