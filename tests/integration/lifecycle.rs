//! Worker state machine and control surface

use crate::common::{Session, QUIET, WAIT};
use elmulator_core::{ResetKind, ThreadState, TrafficLogger};
use std::time::Duration;

#[test]
fn test_pause_blocks_until_resume() {
    let s = Session::start();
    s.emulator.pause().unwrap();
    assert_eq!(s.emulator.thread_state(), ThreadState::Paused);

    s.client.send_line("ATI").unwrap();
    assert!(s.client.drain(QUIET).is_empty());

    s.emulator.resume().unwrap();
    assert_eq!(
        s.client.read_until_prompt(b'>', WAIT).as_deref(),
        Some("ELM327 v1.5\r>")
    );
}

#[test]
fn test_stop_ends_worker() {
    let mut s = Session::start();
    s.emulator.stop();
    assert_eq!(s.emulator.thread_state(), ThreadState::Stopped);
    assert!(s.client.send_line("ATI").is_err());
    assert!(s.emulator.resume().is_err());

    let states: Vec<ThreadState> = s.emulator.history().iter().map(|t| t.to).collect();
    assert_eq!(states, vec![ThreadState::Active, ThreadState::Stopped]);
}

#[test]
fn test_stop_while_paused() {
    let mut s = Session::start();
    s.emulator.pause().unwrap();
    s.emulator.stop();
    assert_eq!(s.emulator.thread_state(), ThreadState::Stopped);
}

#[test]
fn test_resets() {
    let s = Session::start();
    s.emulator.set_scenario("engineoff").unwrap();
    s.emulator.set_delay(Duration::from_millis(1));
    assert_eq!(s.reply("ATH1"), "OK");
    assert_eq!(s.reply("ATSH7E1"), "OK");

    s.emulator.reset(ResetKind::Soft);
    let counters = s.emulator.counters();
    assert_eq!(counters.text("cmd_header").as_deref(), Some("7E0"));
    assert!(counters.get("cmd_show_headers").is_none());
    assert_eq!(counters.count("AT_HEADERS"), 1);
    assert_eq!(s.emulator.scenario(), "engineoff");
    assert_eq!(s.emulator.delay(), Duration::from_millis(1));

    s.emulator.reset(ResetKind::Full);
    assert_eq!(s.emulator.scenario(), "default");
    assert_eq!(s.emulator.delay(), Duration::ZERO);
    assert_eq!(s.emulator.counters().count("AT_HEADERS"), 0);
}

#[test]
fn test_unknown_scenario_rejected() {
    let s = Session::start();
    assert!(s.emulator.set_scenario("missing").is_err());
    assert_eq!(s.emulator.scenario(), "default");
}

#[test]
fn test_response_delay() {
    let s = Session::start();
    s.emulator.set_delay(Duration::from_millis(150));
    let started = std::time::Instant::now();
    assert_eq!(s.reply("ATI"), "ELM327 v1.5");
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[test]
fn test_request_timeout_discards_partial_command() {
    let s = Session::start();
    s.emulator.set_request_timeout(Duration::from_millis(50));

    s.client.send(b"01").unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(s.ask("05"), ">");
    assert_eq!(s.emulator.counters().count("unknown_05"), 1);
    assert_eq!(s.emulator.counters().count("ENGINE_COOLANT_TEMP"), 0);
}

#[test]
fn test_traffic_log() {
    let engine = elmulator_core::Engine::builtin(&Default::default()).unwrap();
    let traffic = TrafficLogger::new().shared();
    let mut emulator = elmulator_core::Emulator::new(engine).with_traffic_log(traffic.clone());
    let (endpoint, client) = elmulator_core::loopback_pair("traffic");
    emulator.start(Box::new(endpoint)).unwrap();

    client.send_line("0100").unwrap();
    client.read_until_prompt(b'>', WAIT).unwrap();
    emulator.stop();

    let logger = traffic.lock();
    let entries = logger.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].data, b"0100");
    assert_eq!(entries[1].data, b"41 00 BE 3F A8 13\r>");
}
