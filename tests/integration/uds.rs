//! Task-backed UDS services

use crate::common::Session;
use elmulator_core::core::task::{MemorySettings, SecurityAccess};
use elmulator_core::TaskSettings;
use std::thread;
use std::time::{Duration, Instant};

fn fast_tasks() -> TaskSettings {
    TaskSettings {
        security_ms: 0,
        ..Default::default()
    }
}

fn bytes(reply: &str) -> Vec<u8> {
    hex::decode(reply.replace(' ', "")).unwrap()
}

fn unlock(s: &Session) {
    let seed_reply = bytes(&s.reply("2701"));
    assert_eq!(&seed_reply[..2], &[0x67, 0x01]);
    let key = SecurityAccess::expected_key(&seed_reply[2..], &[0xFF]);
    assert_eq!(s.reply(&format!("2702{}", hex::encode_upper(key))), "67 02");
}

#[test]
fn test_ecu_reset_timing() {
    let s = Session::start();
    let started = Instant::now();
    assert_eq!(s.reply("1101"), "7F 11 78");

    thread::sleep(Duration::from_millis(100));
    assert_eq!(s.reply("1101"), "7F 11 78");
    thread::sleep(Duration::from_millis(200));
    assert_eq!(s.reply("1101"), "7F 11 78");

    let remaining = Duration::from_millis(550).saturating_sub(started.elapsed());
    thread::sleep(remaining);
    assert_eq!(s.reply("1101"), "51 01");
    assert!(s.emulator.engine().lock().pending_tasks().is_empty());

    // a fresh task starts
    assert_eq!(s.reply("1101"), "7F 11 78");
}

#[test]
fn test_seed_released_after_delay() {
    let s = Session::start();
    assert_eq!(s.reply("2701"), "7F 27 78");
    thread::sleep(Duration::from_millis(250));
    let seed = bytes(&s.reply("2701"));
    assert_eq!(seed.len(), 6);
    assert_eq!(&seed[..2], &[0x67, 0x01]);
}

#[test]
fn test_memory_requires_security_access() {
    let s = Session::with_tasks(fast_tasks());
    assert_eq!(s.reply("2312100004"), "7F 23 33");

    unlock(&s);
    assert_eq!(s.reply("2312100004"), "63 00 00 00 00");
    assert_eq!(s.reply("23140000FFFF04"), "7F 23 12");
}

#[test]
fn test_wrong_key_rejected() {
    let s = Session::with_tasks(fast_tasks());
    s.reply("2701");
    assert_eq!(s.reply("270200000000"), "7F 27 35");
    assert_eq!(s.reply("2312100004"), "7F 23 33");
}

#[test]
fn test_key_without_seed() {
    let s = Session::with_tasks(fast_tasks());
    assert_eq!(s.reply("270211223344"), "7F 27 24");
}

#[test]
fn test_single_frame_write_then_read() {
    let s = Session::with_tasks(fast_tasks());
    unlock(&s);
    assert_eq!(s.reply("3D121010030A0B0C"), "7D 12 10 10 03");
    assert_eq!(s.reply("2312101003"), "63 0A 0B 0C");
}

#[test]
fn test_multi_frame_write_to_backing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ecu.bin");
    let s = Session::with_tasks(TaskSettings {
        security_ms: 0,
        memory: MemorySettings {
            file: Some(path.clone()),
            base_address: 0,
            size: 0x2000,
        },
        ..Default::default()
    });
    unlock(&s);

    assert_eq!(s.reply("ATCAF0"), "OK");
    // 3D 14 <00 00 10 00> <04> 01 02 03 04 across three frames
    assert_eq!(s.reply("100B3D1400001000"), "30 00 00");
    assert_eq!(s.ask("21040102"), ">");
    assert_eq!(s.reply("220304"), "07 7D 14 00 00 10 00 04");

    let image = std::fs::read(&path).unwrap();
    assert_eq!(image.len(), 0x2000);
    assert_eq!(&image[0x1000..0x1004], &[1, 2, 3, 4]);
}

#[test]
fn test_consecutive_frame_without_transfer_ignored() {
    let s = Session::with_tasks(fast_tasks());
    assert_eq!(s.ask("21040102"), ">");
    assert!(s.emulator.engine().lock().pending_tasks().is_empty());
}

#[test]
fn test_key_during_pending_seed_is_sequence_error() {
    let s = Session::start();
    assert_eq!(s.reply("2701"), "7F 27 78");
    assert_eq!(s.reply("270200000000"), "7F 27 24");
    assert!(s.emulator.engine().lock().pending_tasks().is_empty());
}

#[test]
fn test_caf_on_abandons_raw_transfer() {
    let s = Session::with_tasks(fast_tasks());
    assert_eq!(s.reply("ATCAF0"), "OK");
    assert_eq!(s.reply("100B3D1400001000"), "30 00 00");
    assert_eq!(s.reply("ATCAF1"), "OK");

    let seed = bytes(&s.reply("2701"));
    assert_eq!(&seed[..2], &[0x67, 0x01]);
    assert!(s.emulator.engine().lock().pending_tasks().is_empty());
}
