//! OBD-II requests and adapter flags

use crate::common::{Session, QUIET};
use elmulator_core::core::counters;

#[test]
fn test_supported_pids() {
    let s = Session::start();
    assert_eq!(s.ask("0100"), "41 00 BE 3F A8 13\r>");
    assert_eq!(s.ask("01 20"), "41 20 80 00 00 01\r>");
    assert_eq!(s.emulator.counters().count("ELM_PIDS_A"), 1);
}

#[test]
fn test_engine_off_sequence() {
    let s = Session::start();
    s.emulator.set_scenario("engineoff").unwrap();

    assert_eq!(s.ask("0100"), "SEARCHING...\rUNABLE TO CONNECT\r>");
    for _ in 0..10 {
        let reply = s.reply("0100");
        assert!(reply == "NO DATA" || reply == "BUS ERROR", "{}", reply);
    }
}

#[test]
fn test_empty_line_repeats_last_command() {
    let s = Session::start();
    assert_eq!(s.ask("0105"), "41 05 7B\r>");
    assert_eq!(s.ask(""), "41 05 7B\r>");
    assert_eq!(s.emulator.counters().count("ENGINE_COOLANT_TEMP"), 2);
    assert_eq!(
        s.emulator.counters().text(counters::LAST_CMD).as_deref(),
        Some("0105")
    );
}

#[test]
fn test_empty_line_without_history() {
    let s = Session::start();
    assert_eq!(s.ask(""), ">");
}

#[test]
fn test_rpm_follows_sequence() {
    let s = Session::start();
    let first = s.reply("010C");
    let second = s.reply("010C");
    assert_eq!(first, "41 0C 09 B0");
    assert_ne!(first, second);
}

#[test]
fn test_multi_frame_vin() {
    let s = Session::start();
    assert_eq!(
        s.ask("0902"),
        "014\r0: 49 02 01 31 44 34\r1: 47 50 30 30 52 35 35\r2: 42 31 32 33 34 35 36\r>"
    );
}

#[test]
fn test_headers_and_spaces() {
    let s = Session::start();
    assert_eq!(s.reply("ATH1"), "OK");
    assert_eq!(s.reply("0100"), "7E8 06 41 00 BE 3F A8 13");
    assert_eq!(s.reply("ATS0"), "OK");
    assert_eq!(s.reply("0100"), "7E8064100BE3FA813");
}

#[test]
fn test_echo_and_linefeeds() {
    let s = Session::start();
    assert_eq!(s.ask("ATE1"), "OK\r>");
    assert_eq!(s.ask("ATI"), "ATI\rELM327 v1.5\r>");
    assert_eq!(s.ask("ATE0"), "ATE0\rOK\r>");
    assert_eq!(s.ask("ATL1"), "OK\r\n>");
    assert_eq!(s.ask("ATZ"), "ELM327 v1.5\r>");
}

#[test]
fn test_invalid_input_is_silent() {
    let s = Session::start();
    s.client.send_line("01#00").unwrap();
    assert!(s.client.drain(QUIET).is_empty());
    assert!(s.emulator.counters().text(counters::LAST_CMD).is_none());
    assert_eq!(s.ask("ATI"), "ELM327 v1.5\r>");
}

#[test]
fn test_unknown_command_counted() {
    let s = Session::start();
    assert_eq!(s.ask("0199"), ">");
    assert_eq!(s.emulator.counters().count("unknown_0199"), 1);
}

#[test]
fn test_voltage_evaluated_at_write_time() {
    let s = Session::start();
    let reply = s.reply("ATRV");
    let volts: f64 = reply.trim_end_matches('V').parse().unwrap();
    assert!((12.0..=14.5).contains(&volts), "{}", reply);
}
