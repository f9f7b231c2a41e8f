//! Rule registry
//!
//! Scenarios map rule ids to rules. The active view overlays `default`,
//! `AT` and the selected scenario (later wins on id collision) and orders
//! the result by ascending priority.

use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use super::counters::{Counters, HEADER};
use super::error::{EmulatorError, Result};
use super::session::{ResetKind, SessionState};

/// Base scenario, lowest overlay precedence
pub const DEFAULT_SCENARIO: &str = "default";
/// Adapter command scenario, overlaid on `default`
pub const AT_SCENARIO: &str = "AT";
/// Priority used when a rule declares none
pub const DEFAULT_PRIORITY: u8 = 10;

/// Side-effect verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Answer with this rule
    Proceed,
    /// Keep scanning lower-priority rules
    Skip,
}

/// Mutable view handed to side effects
pub struct EffectContext<'a> {
    /// Sanitized command
    pub cmd: &'a str,
    /// Matching rule id
    pub rule_id: &'a str,
    /// Session counters
    pub counters: &'a mut Counters,
    /// Session fields
    pub session: &'a mut SessionState,
    pub(crate) reset: Option<ResetKind>,
    pub(crate) task_pending: bool,
    pub(crate) cancelled: Vec<String>,
}

impl<'a> EffectContext<'a> {
    /// Create a context
    pub fn new(
        cmd: &'a str,
        rule_id: &'a str,
        counters: &'a mut Counters,
        session: &'a mut SessionState,
        task_pending: bool,
    ) -> Self {
        Self {
            cmd,
            rule_id,
            counters,
            session,
            reset: None,
            task_pending,
            cancelled: Vec::new(),
        }
    }

    /// Request a reset, applied once the side effect returns
    pub fn request_reset(&mut self, kind: ResetKind) {
        self.reset = Some(match (self.reset, kind) {
            (Some(ResetKind::Full), _) => ResetKind::Full,
            _ => kind,
        });
    }

    /// Reset requested by the side effect, if any
    pub fn requested_reset(&self) -> Option<ResetKind> {
        self.reset
    }

    /// Drop the waiting task instance of rule `rule_id`, if any
    pub fn cancel_task(&mut self, rule_id: &str) {
        self.cancelled.push(rule_id.to_string());
    }

    /// True when a task instance for this rule is waiting for more input
    pub fn task_pending(&self) -> bool {
        self.task_pending
    }

    /// Hit count of the matching rule, including this hit
    pub fn hits(&self) -> i64 {
        self.counters.count(self.rule_id)
    }

    /// Command text after `prefix`
    pub fn suffix(&self, prefix: usize) -> &str {
        self.cmd.get(prefix..).unwrap_or("")
    }
}

/// Read-only view handed to response fragments and log expressions
pub struct FragmentInput<'a> {
    /// Sanitized command
    pub cmd: &'a str,
    /// Matching rule
    pub rule: &'a Rule,
    /// Session counters
    pub counters: &'a Counters,
    /// Session fields
    pub session: &'a SessionState,
}

/// Side effect run when a rule matches
pub type SideEffect = Arc<dyn Fn(&mut EffectContext<'_>) -> anyhow::Result<Effect> + Send + Sync>;

/// Dynamic response fragment or log expression
pub type Fragment = Arc<dyn Fn(&FragmentInput<'_>) -> anyhow::Result<String> + Send + Sync>;

/// Box a closure as a [`SideEffect`]
pub fn effect<F>(f: F) -> SideEffect
where
    F: Fn(&mut EffectContext<'_>) -> anyhow::Result<Effect> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as a [`Fragment`]
pub fn fragment<F>(f: F) -> Fragment
where
    F: Fn(&FragmentInput<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Response body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseBody {
    /// Nothing
    #[default]
    Empty,
    /// Fixed text
    Fixed(String),
    /// One alternative picked uniformly per invocation
    Alternatives(Vec<String>),
}

impl ResponseBody {
    /// Resolve the body for one invocation
    pub fn pick(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Fixed(text) => text.clone(),
            Self::Alternatives(options) => options
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Response specification: header fragment + body + footer fragment
#[derive(Clone, Default)]
pub struct ResponseSpec {
    /// Dynamic prefix
    pub header: Option<Fragment>,
    /// Static or random body
    pub body: ResponseBody,
    /// Dynamic suffix
    pub footer: Option<Fragment>,
}

/// A single rule
#[derive(Clone)]
pub struct Rule {
    /// Rule id (counter key)
    pub id: String,
    /// Pattern source as declared
    pub source: String,
    pattern: Regex,
    /// Required `cmd_header` value
    pub header_filter: Option<String>,
    /// Match order, 1 (first) to 10 (last)
    pub priority: u8,
    /// Response specification
    pub response: ResponseSpec,
    /// Side effect
    pub side_effect: Option<SideEffect>,
    /// Diagnostic log expression
    pub log: Option<Fragment>,
    /// Delegated task name
    pub task: Option<String>,
}

impl Rule {
    /// Create a rule whose pattern must match the whole command
    pub fn new(id: &str, pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored).map_err(|source| EmulatorError::InvalidPattern {
            rule: id.to_string(),
            source,
        })?;
        Ok(Self {
            id: id.to_string(),
            source: pattern.to_string(),
            pattern: regex,
            header_filter: None,
            priority: DEFAULT_PRIORITY,
            response: ResponseSpec::default(),
            side_effect: None,
            log: None,
            task: None,
        })
    }

    /// Set priority (clamped to 1..=10)
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, DEFAULT_PRIORITY);
        self
    }

    /// Only match while `cmd_header` equals `header`
    pub fn header_filter(mut self, header: &str) -> Self {
        self.header_filter = Some(header.to_uppercase());
        self
    }

    /// Fixed response
    pub fn response(mut self, text: impl Into<String>) -> Self {
        self.response.body = ResponseBody::Fixed(text.into());
        self
    }

    /// Random response alternatives
    pub fn alternatives<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response.body = ResponseBody::Alternatives(options.into_iter().map(Into::into).collect());
        self
    }

    /// Dynamic header fragment
    pub fn header_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&FragmentInput<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.response.header = Some(fragment(f));
        self
    }

    /// Dynamic footer fragment
    pub fn footer_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&FragmentInput<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.response.footer = Some(fragment(f));
        self
    }

    /// Side effect
    pub fn side_effect<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut EffectContext<'_>) -> anyhow::Result<Effect> + Send + Sync + 'static,
    {
        self.side_effect = Some(effect(f));
        self
    }

    /// Log expression
    pub fn log_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&FragmentInput<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.log = Some(fragment(f));
        self
    }

    /// Delegate to a task
    pub fn task(mut self, name: &str) -> Self {
        self.task = Some(name.to_string());
        self
    }

    /// Pattern and header filter check
    pub fn matches(&self, cmd: &str, counters: &Counters) -> bool {
        if !self.pattern.is_match(cmd) {
            return false;
        }
        match &self.header_filter {
            None => true,
            Some(filter) => counters
                .text(HEADER)
                .is_some_and(|h| h.eq_ignore_ascii_case(filter)),
        }
    }

    /// Counter key for hit counting
    pub fn counter_key(&self) -> &str {
        if self.id.is_empty() {
            "UNKNOWN"
        } else {
            &self.id
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("pattern", &self.source)
            .field("header_filter", &self.header_filter)
            .field("priority", &self.priority)
            .field("body", &self.response.body)
            .field("side_effect", &self.side_effect.is_some())
            .field("task", &self.task)
            .finish()
    }
}

/// Named rule set
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    rules: BTreeMap<String, Arc<Rule>>,
}

impl Scenario {
    /// Build from rules (later duplicates replace earlier ones)
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut scenario = Self::default();
        scenario.merge(rules);
        scenario
    }

    /// Insert or replace rules by id
    pub fn merge(&mut self, rules: impl IntoIterator<Item = Rule>) {
        for rule in rules {
            self.rules.insert(rule.id.clone(), Arc::new(rule));
        }
    }

    /// Rule by id
    pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
        self.rules.get(id)
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Sorted, merged rule list for one scenario activation
#[derive(Debug, Clone)]
pub struct ActiveView {
    scenario: String,
    rules: Vec<Arc<Rule>>,
}

impl ActiveView {
    /// Scenario this view was built for
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Rules in match order
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// Rule by id
    pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// All loaded scenarios
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    scenarios: HashMap<String, Scenario>,
}

impl RuleRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge rules into a scenario, creating it when missing
    pub fn merge(&mut self, scenario: &str, rules: impl IntoIterator<Item = Rule>) {
        self.scenarios
            .entry(scenario.to_string())
            .or_default()
            .merge(rules);
    }

    /// True when the scenario exists
    pub fn contains(&self, scenario: &str) -> bool {
        self.scenarios.contains_key(scenario)
    }

    /// Scenario by name
    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    /// Scenario names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scenarios.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the active view: `default` < `AT` < `scenario`, sorted by priority
    pub fn active_view(&self, scenario: &str) -> Result<ActiveView> {
        let selected = self
            .scenarios
            .get(scenario)
            .ok_or_else(|| EmulatorError::UnknownScenario(scenario.to_string()))?;

        // The base layers never override each other out of order
        let top = (scenario != DEFAULT_SCENARIO && scenario != AT_SCENARIO).then_some(selected);

        let mut merged: BTreeMap<&str, &Arc<Rule>> = BTreeMap::new();
        for layer in [
            self.scenarios.get(DEFAULT_SCENARIO),
            self.scenarios.get(AT_SCENARIO),
            top,
        ]
        .into_iter()
        .flatten()
        {
            for (id, rule) in &layer.rules {
                merged.insert(id.as_str(), rule);
            }
        }

        let mut rules: Vec<Arc<Rule>> = merged.into_values().cloned().collect();
        // Stable: equal priorities keep rule-id order
        rules.sort_by_key(|r| r.priority);

        Ok(ActiveView {
            scenario: scenario.to_string(),
            rules,
        })
    }
}
