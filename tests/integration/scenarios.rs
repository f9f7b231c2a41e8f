//! Scenario data merged at runtime

use crate::common::Session;
use elmulator_core::{Effect, Rule};

const LAB: &str = r#"
lab:
  AT_INFO:
    pattern: "ATI"
    response: "LAB ADAPTER"
  ENGINE_COOLANT_TEMP:
    pattern: "0105"
    header: { text: "<header>7E8</header><size>03</size><data>41 05 " }
    footer: { sequence: { pid: ENGINE_COOLANT_TEMP, base: 40, max: 10, factor: 1, bytes: 1 } }
    response: ""
  GO_HOME:
    pattern: "ATLAB0"
    priority: 1
    response: OK
    side_effect: { set_scenario: default }
"#;

#[test]
fn test_scenario_file_overrides_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lab.yaml");
    std::fs::write(&path, LAB).unwrap();

    let s = Session::start();
    s.emulator.merge_file(&path).unwrap();
    s.emulator.set_scenario("lab").unwrap();

    // scenario wins over AT on the same rule id
    assert_eq!(s.reply("ATI"), "LAB ADAPTER");
    assert_eq!(s.reply("0105"), "41 05 29");
    assert_eq!(s.reply("0105"), "41 05 2A");
    // rules not overridden still come from default
    assert_eq!(s.reply("0100"), "41 00 BE 3F A8 13");

    assert_eq!(s.reply("ATLAB0"), "OK");
    assert_eq!(s.emulator.scenario(), "default");
    assert_eq!(s.reply("ATI"), "ELM327 v1.5");
}

#[test]
fn test_bad_scenario_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"{"lab": {"X": {"pattern": "("}}}"#).unwrap();

    let s = Session::start();
    assert!(s.emulator.merge_file(&path).is_err());
    assert!(s.emulator.set_scenario("lab").is_err());
}

#[test]
fn test_merge_rust_rules_with_priority() {
    let s = Session::start();
    s.emulator.merge(
        "default",
        vec![
            Rule::new("SPEED_LOW", "010D").unwrap().priority(7).response("LOW"),
            Rule::new("SPEED_HIGH", "010D").unwrap().priority(3).response("HIGH"),
            Rule::new("ONCE", "0111")
                .unwrap()
                .priority(2)
                .response("FIRST")
                .side_effect(|cx| Ok(if cx.hits() > 1 { Effect::Skip } else { Effect::Proceed })),
            Rule::new("AFTER", "0111").unwrap().priority(4).response("LATER"),
        ],
    );

    // both beat the built-in VEHICLE_SPEED at the default priority
    assert_eq!(s.reply("010D"), "HIGH");
    assert_eq!(s.reply("0111"), "FIRST");
    assert_eq!(s.reply("0111"), "LATER");
}

#[test]
fn test_alternatives_cover_all_choices() {
    let s = Session::start();
    s.emulator.merge(
        "default",
        vec![Rule::new("FLAKY", "0133")
            .unwrap()
            .priority(1)
            .alternatives(["A", "B", "C"])],
    );

    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..1000 {
        let reply = s.reply("0133");
        assert!(["A", "B", "C"].contains(&reply.as_str()), "{}", reply);
        seen.insert(reply);
    }
    assert_eq!(seen.len(), 3);
}
