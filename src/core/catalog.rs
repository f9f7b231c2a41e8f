//! Built-in scenario catalog
//!
//! `AT` holds the adapter commands, `default` a healthy vehicle with a
//! diagnostic ECU, `engineoff` a vehicle whose ignition is off.

use super::counters::{self, DEFAULT_HEADER};
use super::error::Result;
use super::rules::{Effect, EffectContext, FragmentInput, Rule, RuleRegistry, AT_SCENARIO, DEFAULT_SCENARIO};
use super::sequence::sequence_for;
use super::session::ResetKind;
use super::uds;

/// Rule carrying multi-frame memory writes
const WRITE_MEMORY_RULE: &str = "WRITE_MEMORY";

/// Adapter identification
pub const ELM_VERSION: &str = "ELM327 v1.5";
/// Scenario with the ignition off
pub const ENGINE_OFF_SCENARIO: &str = "engineoff";

const VIN_ECU1: &str = "1D4GP00R55B123456";
const VIN_ECU2: &str = "WVWZZZ1JZXW000001";

/// Registry holding `AT`, `default` and `engineoff`
pub fn builtin() -> Result<RuleRegistry> {
    let mut registry = RuleRegistry::new();
    registry.merge(AT_SCENARIO, at_rules()?);
    registry.merge(DEFAULT_SCENARIO, default_rules()?);
    registry.merge(ENGINE_OFF_SCENARIO, engine_off_rules()?);
    Ok(registry)
}

/// `<header>..</header>` for the ECU answering the current request header
fn reply_header(input: &FragmentInput<'_>) -> anyhow::Result<String> {
    let request = input
        .counters
        .text(counters::HEADER)
        .unwrap_or_else(|| DEFAULT_HEADER.to_string());
    Ok(format!("<header>{}</header>", uds::response_header(&request)))
}

/// Fixed single ECU reply
fn ecu_reply(id: &str, pattern: &str, data: &str) -> Result<Rule> {
    let size = data.split_whitespace().count();
    Ok(Rule::new(id, pattern)?
        .header_fn(reply_header)
        .response(format!("<size>{:02X}</size><data>{}</data>", size, data)))
}

fn ascii_hex(text: &str) -> String {
    uds::to_hex(text.as_bytes())
}

/// Store `1`/`0` from the last command character into `key`
fn toggle(key: &'static str) -> impl Fn(&mut EffectContext<'_>) -> anyhow::Result<Effect> + Send + Sync + 'static {
    move |cx: &mut EffectContext<'_>| {
        let on = cx.cmd.ends_with('1');
        cx.counters.set(key, on);
        Ok(Effect::Proceed)
    }
}

/// Store the command text after `prefix` characters into `key`
fn capture(
    key: &'static str,
    prefix: usize,
) -> impl Fn(&mut EffectContext<'_>) -> anyhow::Result<Effect> + Send + Sync + 'static {
    move |cx: &mut EffectContext<'_>| {
        let value = cx.suffix(prefix).to_string();
        cx.counters.set(key, value);
        Ok(Effect::Proceed)
    }
}

fn at_rules() -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new("AT_RESET", "ATZ|ATWS")?
            .priority(5)
            .response(ELM_VERSION)
            .side_effect(|cx| {
                cx.request_reset(ResetKind::Soft);
                Ok(Effect::Proceed)
            }),
        Rule::new("AT_DEFAULTS", "ATD")?
            .priority(5)
            .response("OK")
            .side_effect(|cx| {
                cx.request_reset(ResetKind::Soft);
                Ok(Effect::Proceed)
            }),
        Rule::new("AT_INFO", "ATI")?.priority(5).response(ELM_VERSION),
        Rule::new("AT_ECHO", "ATE[01]")?
            .priority(5)
            .response("OK")
            .side_effect(toggle(counters::ECHO)),
        Rule::new("AT_LINEFEEDS", "ATL[01]")?
            .priority(5)
            .response("OK")
            .side_effect(toggle(counters::LINEFEEDS)),
        Rule::new("AT_SPACES", "ATS[01]")?
            .priority(5)
            .response("OK")
            .side_effect(toggle(counters::SPACES)),
        Rule::new("AT_HEADERS", "ATH[01]")?
            .priority(5)
            .response("OK")
            .side_effect(toggle(counters::SHOW_HEADERS)),
        Rule::new("AT_CAF", "ATCAF[01]")?
            .priority(5)
            .response("OK")
            .side_effect(|cx| {
                let on = cx.cmd.ends_with('1');
                cx.counters.set(counters::CAN_AUTO_FORMAT, on);
                if on {
                    // a raw multi-frame transfer cannot outlive auto formatting
                    cx.cancel_task(WRITE_MEMORY_RULE);
                }
                Ok(Effect::Proceed)
            }),
        Rule::new("AT_SET_HEADER", "ATSH(?:[0-9A-F]{3}|[0-9A-F]{8})")?
            .priority(5)
            .response("OK")
            .side_effect(capture(counters::HEADER, 4))
            .log_fn(|input| Ok(format!("Header set to {}", &input.cmd[4..]))),
        Rule::new("AT_PROTOCOL", "AT(?:SP|TP)A?[0-9A-C]")?
            .priority(5)
            .response("OK")
            .side_effect(capture("cmd_protocol", 4)),
        Rule::new("AT_DESCRIBE_PROTOCOL", "ATDP")?
            .priority(5)
            .response("AUTO, ISO 15765-4 (CAN 11/500)"),
        Rule::new("AT_DESCRIBE_PROTOCOL_NUMBER", "ATDPN")?
            .priority(5)
            .response("A6"),
        Rule::new("AT_VOLTAGE", "ATRV")?
            .priority(5)
            .response("<eval>voltage</eval>"),
        Rule::new("AT_TIMEOUT", "ATST[0-9A-F]{2}")?
            .priority(5)
            .response("OK"),
        Rule::new("AT_NOOP", "ATAT[0-2]|ATM[01]|ATPC|ATAL|ATNL|ATAR|ATCFC[01]")?
            .priority(5)
            .response("OK"),
        Rule::new("AT_UNKNOWN", "AT.*")?.response("?"),
    ])
}

fn default_rules() -> Result<Vec<Rule>> {
    let vin = |ecu_vin: &str| format!("62 F1 90 {}", ascii_hex(ecu_vin));

    Ok(vec![
        ecu_reply("ELM_PIDS_A", "0100", "41 00 BE 3F A8 13")?,
        ecu_reply("ELM_PIDS_B", "0120", "41 20 80 00 00 01")?,
        ecu_reply("ELM_PIDS_C", "0140", "41 40 FE D0 80 00")?,
        ecu_reply("ENGINE_COOLANT_TEMP", "0105", "41 05 7B")?,
        Rule::new("ENGINE_RPM", "010C")?
            .header_fn(reply_header)
            .response("<size>04</size><data>41 0C ")
            .footer_fn(|input| {
                let value = sequence_for(input.counters, "ENGINE_RPM", 2400, 200, 80, 2);
                Ok(format!("{}</data>", value))
            }),
        Rule::new("VEHICLE_SPEED", "010D")?
            .header_fn(reply_header)
            .response("<size>03</size><data>41 0D ")
            .footer_fn(|input| {
                let value = sequence_for(input.counters, "VEHICLE_SPEED", 0, 60, 2, 1);
                Ok(format!("{}</data>", value))
            }),
        ecu_reply("VIN", "0902", &format!("49 02 01 {}", ascii_hex(VIN_ECU1)))?,
        ecu_reply("DTC", "03", "43 00")?,
        Rule::new("SESSION_CONTROL", "10[0-9A-F]{2}")?
            .header_fn(reply_header)
            .footer_fn(|input| {
                Ok(format!(
                    "<size>06</size><data>50 {} 00 32 01 F4</data>",
                    &input.cmd[2..4]
                ))
            }),
        ecu_reply("TESTER_PRESENT", "3E00", "7E 00")?,
        ecu_reply("VIN_ECU1", "22F190", &vin(VIN_ECU1))?.header_filter("7E0"),
        ecu_reply("VIN_ECU2", "22F190", &vin(VIN_ECU2))?.header_filter("7E1"),
        Rule::new("ECU_RESET", "11[0-9A-F]{2}")?.task("ecu_reset"),
        Rule::new("ERASE_MEMORY", "3101FF00[0-9A-F]*")?.task("erase_memory"),
        Rule::new("SECURITY_ACCESS", "27[0-9A-F]+")?.task("security_access"),
        Rule::new("READ_MEMORY", "23[0-9A-F]+")?.task("read_memory"),
        // raw ISO-TP frames reach this rule too; consecutive frames only
        // while a transfer is in progress
        Rule::new(
            WRITE_MEMORY_RULE,
            "3D[0-9A-F]+|0[0-9A-F]3D[0-9A-F]+|1[0-9A-F]{3}3D[0-9A-F]+|2[0-9A-F]+",
        )?
        .priority(1)
        .task("write_memory")
        .side_effect(|cx| {
            let raw_frames = !cx.counters.flag(counters::CAN_AUTO_FORMAT, true);
            if cx.cmd.starts_with('2') && !(raw_frames && cx.task_pending()) {
                Ok(Effect::Skip)
            } else {
                Ok(Effect::Proceed)
            }
        }),
    ])
}

fn engine_off_rules() -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new("ENGINEOFF_SEARCH", "01[0-9A-F]{2}")?
            .priority(1)
            .response("<writeln>SEARCHING...</writeln>UNABLE TO CONNECT")
            .side_effect(|cx| {
                Ok(if cx.hits() == 1 {
                    Effect::Proceed
                } else {
                    Effect::Skip
                })
            }),
        Rule::new("ENGINEOFF_NODATA", "01[0-9A-F]{2}")?
            .priority(5)
            .alternatives(["NO DATA", "BUS ERROR"]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::Engine;
    use crate::core::task::TaskSettings;

    fn engine() -> Engine {
        Engine::builtin(&TaskSettings::default()).unwrap()
    }

    #[test]
    fn test_scenarios() {
        let registry = builtin().unwrap();
        assert_eq!(registry.names(), vec!["AT", "default", "engineoff"]);
    }

    #[test]
    fn test_supported_pids() {
        let mut e = engine();
        assert_eq!(
            e.dispatch("0100"),
            "<header>7E8</header><size>06</size><data>41 00 BE 3F A8 13</data>"
        );
        assert_eq!(e.counters().count("ELM_PIDS_A"), 1);
    }

    #[test]
    fn test_adapter_flags() {
        let mut e = engine();
        assert_eq!(e.dispatch("ATE1"), "OK");
        assert!(e.counters().flag(counters::ECHO, false));
        assert_eq!(e.dispatch("ATH1"), "OK");
        assert_eq!(e.dispatch("ATSH7E1"), "OK");
        assert_eq!(e.counters().text(counters::HEADER).as_deref(), Some("7E1"));
        assert_eq!(e.dispatch("ATXYZ"), "?");

        assert_eq!(e.dispatch("ATZ"), ELM_VERSION);
        assert!(e.counters().get(counters::ECHO).is_none());
        assert_eq!(e.counters().text(counters::HEADER).as_deref(), Some("7E0"));
    }

    #[test]
    fn test_rpm_sequence() {
        let mut e = engine();
        // the rule counter is incremented before the footer runs
        assert_eq!(
            e.dispatch("010C"),
            "<header>7E8</header><size>04</size><data>41 0C 09 B0</data>"
        );
    }

    #[test]
    fn test_vin_by_header() {
        let mut e = engine();
        assert!(e.dispatch("22F190").contains(&ascii_hex(VIN_ECU1)));
        e.dispatch("ATSH7E1");
        let reply = e.dispatch("22F190");
        assert!(reply.starts_with("<header>7E9</header>"));
        assert!(reply.contains(&ascii_hex(VIN_ECU2)));
        e.dispatch("ATSH7E5");
        assert_eq!(e.dispatch("22F190"), "");
    }

    #[test]
    fn test_engine_off() {
        let mut e = engine();
        e.set_scenario(ENGINE_OFF_SCENARIO).unwrap();
        assert_eq!(
            e.dispatch("0100"),
            "<writeln>SEARCHING...</writeln>UNABLE TO CONNECT"
        );
        for _ in 0..20 {
            let reply = e.dispatch("0100");
            assert!(reply == "NO DATA" || reply == "BUS ERROR", "{}", reply);
        }
        // adapter commands still work
        assert_eq!(e.dispatch("ATI"), ELM_VERSION);
    }

    #[test]
    fn test_consecutive_frame_without_transfer() {
        let mut e = engine();
        // falls through WRITE_MEMORY to the security rule
        assert_eq!(
            e.dispatch("2702FFFFFFFF"),
            "<header>7E8</header><size>03</size><data>7F 27 24</data>"
        );
        assert_eq!(e.counters().count("WRITE_MEMORY"), 1);
    }

    #[test]
    fn test_non_ascii_header_answered() {
        let mut e = engine();
        e.counters_mut().set(counters::HEADER, "18DAaé1");
        // the VIN rules filter on the header, the PID rule does not
        let reply = e.dispatch("0100");
        assert!(reply.contains("41 00 BE 3F A8 13"), "{}", reply);
    }

    #[test]
    fn test_caf_on_drops_raw_transfer() {
        let mut e = engine();
        assert_eq!(e.dispatch("ATCAF0"), "OK");
        assert!(e.dispatch("100B3D1400001000").ends_with("<data>30 00 00</data>"));
        assert_eq!(e.pending_tasks(), vec!["WRITE_MEMORY".to_string()]);

        assert_eq!(e.dispatch("ATCAF1"), "OK");
        assert!(e.pending_tasks().is_empty());
        let reply = e.dispatch("2701");
        assert!(!reply.contains("7F 3D"), "{}", reply);
        assert!(reply.contains("67 01") || reply.contains("7F 27 78"), "{}", reply);
        assert!(!e.pending_tasks().contains(&"WRITE_MEMORY".to_string()));
    }
}
