//! Transport loop and session control surface
//!
//! One worker thread per emulator owns the endpoint and runs the whole
//! read, dispatch and write cycle. Control calls come from other threads
//! and go through the shared engine lock or the thread control block.

mod framing;

pub use framing::{classify, sanitize, Line, LineReader};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::counters::{self, Counters};
use super::engine::Engine;
use super::error::{EmulatorError, Result};
use super::logger::{SharedTrafficLogger, TrafficLogger};
use super::rules::Rule;
use super::session::ResetKind;
use super::state_machine::{StateTransition, ThreadControl, ThreadState};
use super::virtual_port::Endpoint;

/// Transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Read poll interval; bounds how long `stop` waits for the worker
    pub poll_interval_ms: u64,
    /// Prompt written after every response
    pub prompt: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            prompt: ">".to_string(),
        }
    }
}

impl TransportSettings {
    /// Poll interval as a duration (at least 1 ms)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// ELM327 emulator bound to one virtual endpoint at a time
pub struct Emulator {
    engine: Arc<Mutex<Engine>>,
    settings: TransportSettings,
    control: Option<Arc<ThreadControl>>,
    worker: Option<JoinHandle<()>>,
    port_name: Option<String>,
    traffic: Option<SharedTrafficLogger>,
}

impl Emulator {
    /// Create an emulator around `engine` with default transport settings
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            settings: TransportSettings::default(),
            control: None,
            worker: None,
            port_name: None,
            traffic: None,
        }
    }

    /// Replace the transport settings
    pub fn with_settings(mut self, settings: TransportSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Record wire traffic
    pub fn with_traffic_log(mut self, traffic: SharedTrafficLogger) -> Self {
        self.traffic = Some(traffic);
        self
    }

    /// Spawn the worker on `endpoint`; returns the endpoint name
    pub fn start(&mut self, endpoint: Box<dyn Endpoint>) -> Result<String> {
        if self.worker.is_some() && !self.thread_state().is_terminal() {
            return Err(EmulatorError::AlreadyStarted);
        }
        self.join_worker();

        let name = endpoint.name();
        let kind = endpoint.port_type();
        let control = Arc::new(ThreadControl::new());
        let worker = Worker {
            endpoint,
            engine: Arc::clone(&self.engine),
            control: Arc::clone(&control),
            settings: self.settings.clone(),
            traffic: self.traffic.clone(),
        };
        let handle = thread::Builder::new()
            .name("elmulator-worker".to_string())
            .spawn(move || worker.run())?;

        tracing::info!("Emulator started on {} ({:?})", name, kind);
        self.control = Some(control);
        self.worker = Some(handle);
        self.port_name = Some(name.clone());
        Ok(name)
    }

    /// Open a fresh PTY pair and start on it; returns the slave path
    #[cfg(unix)]
    pub fn start_pty(&mut self) -> Result<String> {
        let pty = super::virtual_port::PtyEndpoint::open()?;
        self.start(Box::new(pty))
    }

    /// Suspend processing; received bytes wait in the endpoint
    pub fn pause(&self) -> Result<()> {
        self.transition(ThreadState::Paused)
    }

    /// Resume after `pause`
    pub fn resume(&self) -> Result<()> {
        self.transition(ThreadState::Active)
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(control) = &self.control {
            if let Err(e) = control.transition(ThreadState::Stopped) {
                tracing::warn!("Stop failed: {}", e);
            }
        }
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Emulator worker panicked");
            }
            tracing::info!("Emulator stopped");
        }
    }

    fn transition(&self, to: ThreadState) -> Result<()> {
        let control = self.control.as_ref().ok_or(EmulatorError::InvalidTransition {
            from: ThreadState::Stopped,
            to,
        })?;
        control.transition(to).map(|_| ())
    }

    /// Worker state; `Stopped` before the first start
    pub fn thread_state(&self) -> ThreadState {
        self.control
            .as_ref()
            .map_or(ThreadState::Stopped, |c| c.state())
    }

    /// Block until the worker reaches `state` or `timeout` elapses
    pub fn wait_until(&self, state: ThreadState, timeout: Duration) -> bool {
        match &self.control {
            Some(control) => control.wait_for(state, timeout),
            None => state == ThreadState::Stopped,
        }
    }

    /// Worker state transitions of the current run
    pub fn history(&self) -> Vec<StateTransition> {
        self.control
            .as_ref()
            .map(|c| c.history())
            .unwrap_or_default()
    }

    /// Name of the endpoint of the last start
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Shared engine handle
    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }

    /// Selected scenario
    pub fn scenario(&self) -> String {
        self.engine.lock().scenario().to_string()
    }

    /// Select a scenario
    pub fn set_scenario(&self, name: &str) -> Result<()> {
        self.engine.lock().set_scenario(name)
    }

    /// Response delay
    pub fn delay(&self) -> Duration {
        self.engine.lock().delay()
    }

    /// Set the response delay
    pub fn set_delay(&self, delay: Duration) {
        self.engine.lock().set_delay(delay);
    }

    /// Effective request timeout
    pub fn request_timeout(&self) -> Duration {
        self.engine.lock().request_timeout()
    }

    /// Set the request timeout
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.engine.lock().set_request_timeout(timeout);
    }

    /// Counter snapshot
    pub fn counters(&self) -> Counters {
        self.engine.lock().counters().clone()
    }

    /// Soft or full reset
    pub fn reset(&self, kind: ResetKind) {
        self.engine.lock().reset(kind);
    }

    /// Merge rules into a scenario
    pub fn merge(&self, scenario: &str, rules: impl IntoIterator<Item = Rule>) {
        self.engine.lock().merge(scenario, rules);
    }

    /// Merge a scenario file
    pub fn merge_file(&self, path: &Path) -> Result<()> {
        self.engine.lock().merge_file(path)
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("settings", &self.settings)
            .field("state", &self.thread_state())
            .field("port_name", &self.port_name)
            .finish()
    }
}

struct Worker {
    endpoint: Box<dyn Endpoint>,
    engine: Arc<Mutex<Engine>>,
    control: Arc<ThreadControl>,
    settings: TransportSettings,
    traffic: Option<SharedTrafficLogger>,
}

impl Worker {
    fn run(mut self) {
        if let Err(e) = self.control.transition(ThreadState::Active) {
            tracing::warn!("Worker not started: {}", e);
            return;
        }

        let poll = self.settings.poll_interval();
        let mut reader = LineReader::new();

        loop {
            if self.control.wait_while_paused() == ThreadState::Stopped {
                break;
            }

            let byte = match self.endpoint.read_byte(poll) {
                Ok(Some(byte)) => byte,
                Ok(None) => continue,
                Err(e) => {
                    tracing::info!("Endpoint {} closed: {}", self.endpoint.name(), e);
                    break;
                }
            };

            let (echo, timeout) = {
                let engine = self.engine.lock();
                (
                    engine.counters().flag(counters::ECHO, false),
                    engine.request_timeout(),
                )
            };
            if echo {
                if let Err(e) = self.endpoint.write_all(&[byte]) {
                    tracing::info!("Echo failed: {}", e);
                    break;
                }
            }

            let Some(raw) = reader.push(byte, Instant::now(), timeout) else {
                continue;
            };
            if let Err(e) = self.handle_line(&raw) {
                tracing::info!("Write to {} failed: {}", self.endpoint.name(), e);
                break;
            }
        }

        if let Err(e) = self.control.transition(ThreadState::Stopped) {
            tracing::warn!("{}", e);
        }
        tracing::debug!("Worker for {} exited", self.endpoint.name());
    }

    fn handle_line(&mut self, raw: &[u8]) -> std::io::Result<()> {
        let cmd = match classify(raw) {
            Line::Invalid(text) => {
                tracing::warn!("Rejected invalid input {:?}", text);
                return Ok(());
            }
            Line::Repeat => self.engine.lock().counters().text(counters::LAST_CMD),
            Line::Command(cmd) => {
                self.engine
                    .lock()
                    .counters_mut()
                    .set(counters::LAST_CMD, cmd.as_str());
                Some(cmd)
            }
        };

        let Some(cmd) = cmd else {
            tracing::debug!("Empty line with no previous command");
            let prompt = self.settings.prompt.clone();
            return self.write(prompt.as_bytes());
        };
        self.log_traffic(|t| t.log_rx(cmd.as_bytes()));

        let (reply, delay) = {
            let mut engine = self.engine.lock();
            let reply = engine.dispatch(&cmd);
            (reply, engine.delay())
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let output = self.engine.lock().render(&reply, &self.settings.prompt);
        self.write(output.as_bytes())
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.log_traffic(|t| t.log_tx(data));
        self.endpoint.write_all(data)
    }

    fn log_traffic<F>(&self, f: F)
    where
        F: FnOnce(&mut TrafficLogger),
    {
        if let Some(traffic) = &self.traffic {
            f(&mut traffic.lock());
        }
    }
}
