//! Named actions and scenario files
//!
//! Scenario files declare rules as data. Dynamic parts are written in a
//! small action language (sequences, counter reads, counter writes, resets)
//! or refer to closures registered by name in the [`ActionRegistry`].
//! Write-time `<eval>` names resolve through the same registry.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::counters::{CounterValue, Counters};
use super::error::{EmulatorError, Result};
use super::rules::{effect, fragment, Effect, EffectContext, Fragment, FragmentInput, Rule, SideEffect};
use super::sequence::sequence_for;
use super::session::{ResetKind, SessionState};

/// Input of write-time evaluators
pub struct EvalInput<'a> {
    /// Session counters
    pub counters: &'a Counters,
    /// Session fields
    pub session: &'a SessionState,
}

/// Write-time evaluator
pub type Evaluator = Arc<dyn Fn(&EvalInput<'_>) -> anyhow::Result<String> + Send + Sync>;

/// Prefix of the built-in counter evaluator (`<eval>counter:KEY</eval>`)
pub const COUNTER_EVAL_PREFIX: &str = "counter:";

/// Named side effects, fragments and evaluators
#[derive(Clone, Default)]
pub struct ActionRegistry {
    effects: HashMap<String, SideEffect>,
    fragments: HashMap<String, Fragment>,
    evaluators: HashMap<String, Evaluator>,
}

impl ActionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in evaluators: `voltage`, `scenario`,
    /// `delay_ms`
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_evaluator("voltage", |_| {
            let volts: f64 = rand::thread_rng().gen_range(12.2..14.4);
            Ok(format!("{:.1}V", volts))
        });
        registry.register_evaluator("scenario", |input| Ok(input.session.scenario.clone()));
        registry.register_evaluator("delay_ms", |input| {
            Ok(input.session.delay.as_millis().to_string())
        });
        registry
    }

    /// Register a named side effect
    pub fn register_effect<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut EffectContext<'_>) -> anyhow::Result<Effect> + Send + Sync + 'static,
    {
        self.effects.insert(name.to_string(), Arc::new(f));
    }

    /// Register a named fragment
    pub fn register_fragment<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&FragmentInput<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.fragments.insert(name.to_string(), Arc::new(f));
    }

    /// Register a write-time evaluator
    pub fn register_evaluator<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&EvalInput<'_>) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.evaluators.insert(name.to_string(), Arc::new(f));
    }

    /// Named side effect
    pub fn effect(&self, name: &str) -> Result<SideEffect> {
        self.effects
            .get(name)
            .cloned()
            .ok_or_else(|| EmulatorError::UnknownAction(name.to_string()))
    }

    /// Named fragment
    pub fn fragment(&self, name: &str) -> Result<Fragment> {
        self.fragments
            .get(name)
            .cloned()
            .ok_or_else(|| EmulatorError::UnknownAction(name.to_string()))
    }

    /// Evaluate a write-time name; `None` when unknown or failed
    pub fn evaluate(&self, name: &str, input: &EvalInput<'_>) -> Option<String> {
        if let Some(key) = name.strip_prefix(COUNTER_EVAL_PREFIX) {
            return Some(input.counters.text(key.trim()).unwrap_or_default());
        }
        let evaluator = self.evaluators.get(name)?;
        match evaluator(input) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Evaluator {} failed: {:#}", name, e);
                None
            }
        }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("effects", &self.effects.keys().collect::<Vec<_>>())
            .field("fragments", &self.fragments.keys().collect::<Vec<_>>())
            .field("evaluators", &self.evaluators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Response text: one fixed string or random alternatives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseText {
    /// Fixed text
    One(String),
    /// Alternatives
    Many(Vec<String>),
}

/// Declarative fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentSpec {
    /// Literal text
    Text(String),
    /// Current counter value
    Counter(String),
    /// Triangular telemetry driven by a counter
    Sequence {
        /// Counter driving the wave
        pid: String,
        /// Value at the wave minimum
        base: i64,
        /// Half period
        max: i64,
        /// Amplitude multiplier
        factor: i64,
        /// Output width in bytes
        bytes: usize,
    },
    /// Registered fragment
    Named(String),
}

impl FragmentSpec {
    /// Build the fragment closure
    pub fn compile(&self, actions: &ActionRegistry) -> Result<Fragment> {
        let compiled = match self.clone() {
            Self::Text(text) => fragment(move |_| Ok(text.clone())),
            Self::Counter(key) => {
                fragment(move |input| Ok(input.counters.text(&key).unwrap_or_default()))
            }
            Self::Sequence {
                pid,
                base,
                max,
                factor,
                bytes,
            } => fragment(move |input| {
                Ok(sequence_for(input.counters, &pid, base, max, factor, bytes))
            }),
            Self::Named(name) => actions.fragment(&name)?,
        };
        Ok(compiled)
    }
}

/// Declarative side effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSpec {
    /// Store a value
    SetCounter {
        /// Counter name
        key: String,
        /// Value
        value: CounterValue,
    },
    /// Store the command text after `from` characters
    Capture {
        /// Counter name
        key: String,
        /// Prefix length to drop
        from: usize,
    },
    /// Soft reset
    SoftReset,
    /// Full reset
    FullReset,
    /// Block the worker
    SleepMs(u64),
    /// Skip once the rule was hit more than `n` times
    SkipAfter(i64),
    /// Skip unless a task instance for the rule is waiting
    SkipUnlessPending,
    /// Switch scenario
    SetScenario(String),
    /// Registered side effect
    Named(String),
    /// Run in order; the first `Skip` wins
    All(Vec<EffectSpec>),
}

impl EffectSpec {
    /// Build the side-effect closure
    pub fn compile(&self, actions: &ActionRegistry) -> Result<SideEffect> {
        let compiled = match self.clone() {
            Self::SetCounter { key, value } => effect(move |cx| {
                cx.counters.set(&key, value.clone());
                Ok(Effect::Proceed)
            }),
            Self::Capture { key, from } => effect(move |cx| {
                let value = cx.suffix(from).to_string();
                cx.counters.set(&key, value);
                Ok(Effect::Proceed)
            }),
            Self::SoftReset => effect(|cx| {
                cx.request_reset(ResetKind::Soft);
                Ok(Effect::Proceed)
            }),
            Self::FullReset => effect(|cx| {
                cx.request_reset(ResetKind::Full);
                Ok(Effect::Proceed)
            }),
            Self::SleepMs(ms) => effect(move |_| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok(Effect::Proceed)
            }),
            Self::SkipAfter(n) => effect(move |cx| {
                Ok(if cx.hits() > n { Effect::Skip } else { Effect::Proceed })
            }),
            Self::SkipUnlessPending => effect(|cx| {
                Ok(if cx.task_pending() { Effect::Proceed } else { Effect::Skip })
            }),
            Self::SetScenario(name) => effect(move |cx| {
                cx.session.scenario = name.clone();
                Ok(Effect::Proceed)
            }),
            Self::Named(name) => actions.effect(&name)?,
            Self::All(list) => {
                let steps = list
                    .iter()
                    .map(|spec| spec.compile(actions))
                    .collect::<Result<Vec<_>>>()?;
                effect(move |cx| {
                    for step in &steps {
                        if step(cx)? == Effect::Skip {
                            return Ok(Effect::Skip);
                        }
                    }
                    Ok(Effect::Proceed)
                })
            }
        };
        Ok(compiled)
    }
}

/// One rule as declared in a scenario file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Regular expression matched against the whole command
    pub pattern: String,
    /// Required `cmd_header`
    #[serde(default)]
    pub header_filter: Option<String>,
    /// 1..=10
    #[serde(default)]
    pub priority: Option<u8>,
    /// Body
    #[serde(default)]
    pub response: Option<ResponseText>,
    /// Dynamic prefix
    #[serde(default)]
    pub header: Option<FragmentSpec>,
    /// Dynamic suffix
    #[serde(default)]
    pub footer: Option<FragmentSpec>,
    /// Side effect
    #[serde(default)]
    pub side_effect: Option<EffectSpec>,
    /// Log format with `{cmd}`, `{rule}`, `{count}`
    #[serde(default)]
    pub log: Option<String>,
    /// Delegated task
    #[serde(default)]
    pub task: Option<String>,
}

impl RuleSpec {
    /// Build the rule
    pub fn into_rule(self, id: &str, actions: &ActionRegistry) -> Result<Rule> {
        let mut rule = Rule::new(id, &self.pattern)?;
        if let Some(filter) = &self.header_filter {
            rule = rule.header_filter(filter);
        }
        if let Some(priority) = self.priority {
            rule = rule.priority(priority);
        }
        rule = match self.response {
            Some(ResponseText::One(text)) => rule.response(text),
            Some(ResponseText::Many(options)) => rule.alternatives(options),
            None => rule,
        };
        if let Some(spec) = &self.header {
            rule.response.header = Some(spec.compile(actions)?);
        }
        if let Some(spec) = &self.footer {
            rule.response.footer = Some(spec.compile(actions)?);
        }
        if let Some(spec) = &self.side_effect {
            rule.side_effect = Some(spec.compile(actions)?);
        }
        if let Some(format) = self.log {
            rule = rule.log_fn(move |input| {
                Ok(format
                    .replace("{cmd}", input.cmd)
                    .replace("{rule}", &input.rule.id)
                    .replace("{count}", &input.counters.count(&input.rule.id).to_string()))
            });
        }
        if let Some(task) = &self.task {
            rule = rule.task(task);
        }
        Ok(rule)
    }
}

/// Scenario file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `.yaml`, `.yml`
    Yaml,
    /// `.json`
    Json,
    /// `.toml`
    Toml,
}

impl FileFormat {
    /// Format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Scenario file contents: scenario -> rule id -> rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioFile {
    scenarios: BTreeMap<String, BTreeMap<String, RuleSpec>>,
}

impl ScenarioFile {
    /// Parse text in `format`
    pub fn parse(text: &str, format: FileFormat) -> Result<Self> {
        let parsed = match format {
            // Variants are written as `{ name: value }` maps rather than YAML tags
            FileFormat::Yaml => serde_yaml::with::singleton_map_recursive::deserialize(
                serde_yaml::Deserializer::from_str(text),
            )
            .map_err(|e| e.to_string()),
            FileFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            FileFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(EmulatorError::ScenarioFile)
    }

    /// Load a file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = FileFormat::from_path(path).ok_or_else(|| {
            EmulatorError::ScenarioFile(format!("unsupported file type: {}", path.display()))
        })?;
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, format)
    }

    /// Scenario names declared by the file
    pub fn scenario_names(&self) -> impl Iterator<Item = &String> {
        self.scenarios.keys()
    }

    /// Compile every rule, grouped by scenario
    pub fn compile(self, actions: &ActionRegistry) -> Result<Vec<(String, Vec<Rule>)>> {
        self.scenarios
            .into_iter()
            .map(|(scenario, specs)| {
                let rules = specs
                    .into_iter()
                    .map(|(id, spec)| spec.into_rule(&id, actions))
                    .collect::<Result<Vec<_>>>()?;
                Ok((scenario, rules))
            })
            .collect()
    }
}
