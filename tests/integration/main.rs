//! End-to-end tests driving the emulator over a loopback endpoint

mod common;
mod lifecycle;
mod obd;
mod scenarios;
mod uds;
