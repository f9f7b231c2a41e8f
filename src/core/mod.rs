//! Core module containing the emulator
//!
//! This module provides:
//! - Rule registry, scenarios and the dispatch engine
//! - Counters and session state with soft/full reset
//! - Sequence generator for synthetic sensor values
//! - Long-running UDS tasks (ECU reset, security access, memory access)
//! - Response template rendering with ISO-TP framing
//! - Virtual serial endpoints (PTY, loopback)
//! - Transport loop with a pause/resume/stop state machine
//! - Traffic logging

pub mod actions;
pub mod catalog;
pub mod counters;
pub mod engine;
pub mod error;
pub mod logger;
pub mod response;
pub mod rules;
pub mod sequence;
pub mod session;
pub mod state_machine;
pub mod task;
pub mod transport;
pub mod uds;
pub mod virtual_port;
