//! Dispatch engine
//!
//! Owns every piece of session state: rule registry, counters, scenario,
//! delay, request timeout and live task instances. One command goes in, one
//! response template comes out; the transport renders it at write time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::actions::{ActionRegistry, EvalInput, ScenarioFile};
use super::catalog;
use super::counters::{self, Counters};
use super::error::{EmulatorError, Result};
use super::response::{compose_output, render_lines, RenderSettings};
use super::rules::{ActiveView, Effect, EffectContext, Fragment, FragmentInput, Rule, RuleRegistry};
use super::session::{ResetKind, SessionState};
use super::task::{SharedTaskState, Task, TaskContext, TaskOutcome, TaskRegistry, TaskSettings};
use super::uds::{self, Nrc};

/// Counter prefix for unmatched commands
pub const UNKNOWN_PREFIX: &str = "unknown_";

/// Rule-matching engine with its session state
pub struct Engine {
    registry: RuleRegistry,
    tasks: TaskRegistry,
    actions: ActionRegistry,
    counters: Counters,
    session: SessionState,
    view: Option<Arc<ActiveView>>,
    running: HashMap<String, Box<dyn Task>>,
    shared: SharedTaskState,
}

impl Engine {
    /// Engine over `registry` with `tasks`
    pub fn new(registry: RuleRegistry, tasks: TaskRegistry) -> Self {
        Self {
            registry,
            tasks,
            actions: ActionRegistry::builtin(),
            counters: Counters::new(),
            session: SessionState::default(),
            view: None,
            running: HashMap::new(),
            shared: SharedTaskState::default(),
        }
    }

    /// Engine with the sample catalog and the built-in tasks
    pub fn builtin(settings: &TaskSettings) -> Result<Self> {
        let registry = catalog::builtin()?;
        let tasks = TaskRegistry::builtin(settings)?;
        Ok(Self::new(registry, tasks))
    }

    /// Replace the action registry used by scenario files and `<eval>`
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Resolve one sanitized command to a response template
    ///
    /// Returns an empty string when nothing matched.
    pub fn dispatch(&mut self, cmd: &str) -> String {
        let view = match self.active_view() {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!("No active rule view: {}", e);
                return String::new();
            }
        };

        for rule in view.rules() {
            if !rule.matches(cmd, &self.counters) {
                continue;
            }
            let key = rule.counter_key();
            self.counters.increment(key);

            if let Some(effect) = &rule.side_effect {
                let task_pending = self.running.contains_key(key);
                let mut cx = EffectContext::new(
                    cmd,
                    key,
                    &mut self.counters,
                    &mut self.session,
                    task_pending,
                );
                let verdict = match effect(&mut cx) {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        tracing::warn!("Side effect of {} failed: {:#}", key, e);
                        Effect::Proceed
                    }
                };
                let reset = cx.requested_reset();
                let cancelled = std::mem::take(&mut cx.cancelled);
                for id in cancelled {
                    if self.running.remove(&id).is_some() {
                        tracing::debug!("Task of {} cancelled by {}", id, key);
                    }
                }
                self.after_side_effect(reset, view.scenario());

                if verdict == Effect::Skip {
                    tracing::debug!("Rule {} skipped {}", key, cmd);
                    continue;
                }
            }

            tracing::debug!("Rule {} matched {}", key, cmd);
            self.log_hit(rule, cmd);

            return match &rule.task {
                Some(task) => self.run_task(rule, task, cmd),
                None => self.compose(rule, cmd),
            };
        }

        let key = format!("{}{}", UNKNOWN_PREFIX, cmd);
        let misses = self.counters.increment(&key);
        tracing::debug!("Unknown command {} ({} times)", cmd, misses);
        String::new()
    }

    fn active_view(&mut self) -> Result<Arc<ActiveView>> {
        if let Some(view) = &self.view {
            if view.scenario() == self.session.scenario {
                return Ok(view.clone());
            }
        }
        let view = Arc::new(self.registry.active_view(&self.session.scenario)?);
        self.view = Some(view.clone());
        Ok(view)
    }

    fn after_side_effect(&mut self, reset: Option<ResetKind>, scenario_before: &str) {
        if let Some(kind) = reset {
            self.reset(kind);
        }
        if self.session.scenario != scenario_before {
            if self.registry.contains(&self.session.scenario) {
                tracing::info!("Scenario changed to {}", self.session.scenario);
            } else {
                tracing::warn!(
                    "Side effect selected unknown scenario {}, keeping {}",
                    self.session.scenario,
                    scenario_before
                );
                self.session.scenario = scenario_before.to_string();
            }
            self.view = None;
        }
    }

    fn log_hit(&self, rule: &Rule, cmd: &str) {
        let Some(log) = &rule.log else {
            return;
        };
        let input = FragmentInput {
            cmd,
            rule,
            counters: &self.counters,
            session: &self.session,
        };
        match log(&input) {
            Ok(line) => tracing::info!(rule = %rule.id, "{}", line),
            Err(e) => tracing::warn!("Log expression of {} failed: {:#}", rule.id, e),
        }
    }

    fn compose(&self, rule: &Rule, cmd: &str) -> String {
        let input = FragmentInput {
            cmd,
            rule,
            counters: &self.counters,
            session: &self.session,
        };
        let fragment_text = |part: &str, fragment: Option<&Fragment>| match fragment {
            Some(f) => f(&input).unwrap_or_else(|e| {
                tracing::warn!("Response {} of {} failed: {:#}", part, rule.id, e);
                String::new()
            }),
            None => String::new(),
        };

        let mut out = fragment_text("header", rule.response.header.as_ref());
        out.push_str(&rule.response.body.pick());
        out.push_str(&fragment_text("footer", rule.response.footer.as_ref()));
        out
    }

    fn run_task(&mut self, rule: &Rule, name: &str, cmd: &str) -> String {
        let key = rule.counter_key();
        let (mut task, fresh) = match self.running.remove(key) {
            Some(task) => (task, false),
            None => match self.tasks.create(name) {
                Some(task) => (task, true),
                None => {
                    tracing::warn!("Rule {} refers to unknown task {}", key, name);
                    return self.task_failure(cmd, Nrc::GeneralReject);
                }
            },
        };

        let mut cx = TaskContext {
            cmd,
            rule_id: key,
            counters: &mut self.counters,
            shared: &mut self.shared,
        };
        let outcome = if fresh {
            tracing::debug!("Starting task {} for {}", name, key);
            task.start(&mut cx)
        } else {
            task.run(&mut cx)
        };

        match outcome {
            TaskOutcome::Answer(text) => {
                tracing::debug!("Task {} answered", name);
                text
            }
            TaskOutcome::Continue(text) => {
                self.running.insert(key.to_string(), task);
                text
            }
            TaskOutcome::Error(nrc) => {
                tracing::info!("Task {} failed with {}", name, nrc);
                uds::frame(
                    &self.response_header(),
                    &uds::negative_response(task.service_id(), nrc),
                )
            }
            TaskOutcome::Terminate => {
                tracing::debug!("Task {} terminated", name);
                String::new()
            }
        }
    }

    /// Negative response for a task that could not be created
    fn task_failure(&self, cmd: &str, nrc: Nrc) -> String {
        match uds::parse_hex(cmd).and_then(|bytes| bytes.first().copied()) {
            Some(service) => uds::frame(&self.response_header(), &uds::negative_response(service, nrc)),
            None => String::new(),
        }
    }

    fn response_header(&self) -> String {
        let request = self
            .counters
            .text(counters::HEADER)
            .unwrap_or_else(|| counters::DEFAULT_HEADER.to_string());
        uds::response_header(&request)
    }

    /// Render a response template into the bytes written to the client
    pub fn render(&self, template: &str, prompt: &str) -> String {
        let settings = RenderSettings::from_counters(&self.counters);
        let input = EvalInput {
            counters: &self.counters,
            session: &self.session,
        };
        let lines = render_lines(template, &settings, |name| self.actions.evaluate(name, &input));
        compose_output(&lines, &settings, prompt)
    }

    /// Selected scenario
    pub fn scenario(&self) -> &str {
        &self.session.scenario
    }

    /// Select a scenario
    pub fn set_scenario(&mut self, name: &str) -> Result<()> {
        if !self.registry.contains(name) {
            return Err(EmulatorError::UnknownScenario(name.to_string()));
        }
        if self.session.scenario != name {
            tracing::info!("Scenario set to {}", name);
            self.session.scenario = name.to_string();
            self.view = None;
        }
        Ok(())
    }

    /// Delay applied before each response
    pub fn delay(&self) -> Duration {
        self.session.delay
    }

    /// Set the response delay
    pub fn set_delay(&mut self, delay: Duration) {
        self.session.delay = delay;
    }

    /// Effective inter-byte request timeout
    ///
    /// A numeric `cmd_request_timeout` counter (seconds) overrides the
    /// session value.
    pub fn request_timeout(&self) -> Duration {
        match self
            .counters
            .get(counters::REQUEST_TIMEOUT)
            .and_then(|v| v.as_int())
        {
            Some(secs) if secs > 0 => Duration::from_secs(secs.unsigned_abs()),
            _ => self.session.request_timeout,
        }
    }

    /// Set the session request timeout
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.session.request_timeout = timeout;
    }

    /// Session counters
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Mutable session counters
    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    /// Rule registry
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Cross-task state
    pub fn shared_state(&self) -> &SharedTaskState {
        &self.shared
    }

    /// Rule ids with a live task instance, sorted
    pub fn pending_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Soft or full reset
    ///
    /// Both drop live tasks and the shared task state.
    pub fn reset(&mut self, kind: ResetKind) {
        match kind {
            ResetKind::Soft => self.counters.soft_reset(),
            ResetKind::Full => {
                self.counters.full_reset();
                self.session.full_reset();
                self.view = None;
            }
        }
        self.running.clear();
        self.shared = SharedTaskState::default();
        tracing::info!("{:?} reset", kind);
    }

    /// Merge rules into a scenario
    pub fn merge(&mut self, scenario: &str, rules: impl IntoIterator<Item = Rule>) {
        self.registry.merge(scenario, rules);
        self.view = None;
    }

    /// Merge a scenario file
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let file = ScenarioFile::load(path)?;
        for (scenario, rules) in file.compile(&self.actions)? {
            tracing::info!(
                "Merged {} rules into {} from {}",
                rules.len(),
                scenario,
                path.display()
            );
            self.merge(&scenario, rules);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scenario", &self.session.scenario)
            .field("scenarios", &self.registry.names())
            .field("tasks", &self.tasks)
            .field("pending", &self.pending_tasks())
            .finish()
    }
}
