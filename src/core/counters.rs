//! Session counters
//!
//! A string-keyed store shared by rules, tasks and the transport loop.
//! Keys are rule ids (hit counts), adapter flags with the reserved `cmd_`
//! prefix, and synthetic keys such as `last_cmd` or `unknown_<cmd>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix for adapter configuration counters cleared by a soft reset
pub const RESERVED_PREFIX: &str = "cmd_";

/// Echo received bytes back (ATE)
pub const ECHO: &str = "cmd_echo";
/// Use `\r\n` line endings (ATL)
pub const LINEFEEDS: &str = "cmd_linefeeds";
/// Print spaces between bytes (ATS)
pub const SPACES: &str = "cmd_spaces";
/// Show CAN headers and PCI bytes (ATH)
pub const SHOW_HEADERS: &str = "cmd_show_headers";
/// CAN auto formatting (ATCAF)
pub const CAN_AUTO_FORMAT: &str = "cmd_caf";
/// Request header set with ATSH, compared against rule header filters
pub const HEADER: &str = "cmd_header";
/// Inter-byte request timeout override in seconds
pub const REQUEST_TIMEOUT: &str = "cmd_request_timeout";
/// Last dispatched command, re-issued on an empty line
pub const LAST_CMD: &str = "last_cmd";

/// Request header restored by every reset
pub const DEFAULT_HEADER: &str = "7E0";

/// Supported-PID counters zeroed by every reset
pub const SUPPORTED_PID_COUNTERS: [&str; 3] = ["ELM_PIDS_A", "ELM_PIDS_B", "ELM_PIDS_C"];

/// Counter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CounterValue {
    /// Integer value (hit counts, flags)
    Int(i64),
    /// Text value (headers, last command)
    Text(String),
}

impl CounterValue {
    /// Integer view; text values parse as decimal when possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Text view
    pub fn as_text(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for CounterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for CounterValue {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for CounterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for CounterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Counter store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters {
    values: BTreeMap<String, CounterValue>,
}

impl Counters {
    /// Create a store holding the reset defaults
    pub fn new() -> Self {
        let mut counters = Self::default();
        counters.apply_defaults();
        counters
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<&CounterValue> {
        self.values.get(key)
    }

    /// Integer value, 0 when missing or not numeric
    pub fn count(&self, key: &str) -> i64 {
        self.get(key).and_then(CounterValue::as_int).unwrap_or(0)
    }

    /// Text value
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(CounterValue::as_text)
    }

    /// Flag value, `default` when missing
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(CounterValue::as_int)
            .map_or(default, |v| v != 0)
    }

    /// Set a value
    pub fn set(&mut self, key: &str, value: impl Into<CounterValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<CounterValue> {
        self.values.remove(key)
    }

    /// Increment counter, returning the new count
    pub fn increment(&mut self, key: &str) -> i64 {
        let next = self.count(key) + 1;
        self.values.insert(key.to_string(), CounterValue::Int(next));
        next
    }

    /// Iterate over all counters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CounterValue)> {
        self.values.iter()
    }

    /// Number of stored counters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no counter is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Clear reserved `cmd_` counters and restore the defaults
    pub fn soft_reset(&mut self) {
        self.values.retain(|k, _| !k.starts_with(RESERVED_PREFIX));
        self.apply_defaults();
    }

    /// Clear every counter and restore the defaults
    pub fn full_reset(&mut self) {
        self.values.clear();
        self.apply_defaults();
    }

    fn apply_defaults(&mut self) {
        for key in SUPPORTED_PID_COUNTERS {
            self.set(key, 0);
        }
        self.set(HEADER, DEFAULT_HEADER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_flags() {
        let mut c = Counters::new();
        assert_eq!(c.increment("ENGINE_RPM"), 1);
        assert_eq!(c.increment("ENGINE_RPM"), 2);
        assert!(!c.flag(ECHO, false));
        c.set(ECHO, true);
        assert!(c.flag(ECHO, false));
        assert!(c.flag(SPACES, true));
    }

    #[test]
    fn test_soft_reset_keeps_rule_counters() {
        let mut c = Counters::new();
        c.set(ECHO, 1);
        c.set(HEADER, "7E1");
        c.set("ENGINE_RPM", 7);
        c.set("ELM_PIDS_A", 3);

        c.soft_reset();

        assert!(c.get(ECHO).is_none());
        assert_eq!(c.text(HEADER).as_deref(), Some(DEFAULT_HEADER));
        assert_eq!(c.count("ENGINE_RPM"), 7);
        assert_eq!(c.count("ELM_PIDS_A"), 0);
    }

    #[test]
    fn test_full_reset_clears_everything() {
        let mut c = Counters::new();
        c.set("ENGINE_RPM", 7);
        c.set(LAST_CMD, "0100");
        c.full_reset();
        assert_eq!(c.count("ENGINE_RPM"), 0);
        assert!(c.get(LAST_CMD).is_none());
        assert_eq!(c.text(HEADER).as_deref(), Some(DEFAULT_HEADER));
    }

    #[test]
    fn test_counter_value_views() {
        assert_eq!(CounterValue::from("12").as_int(), Some(12));
        assert_eq!(CounterValue::from("7E0").as_int(), None);
        assert_eq!(CounterValue::from(5).as_text(), "5");
    }
}
