//! Shared harness

use elmulator_core::{
    loopback_pair, Emulator, Engine, LoopbackClient, TaskSettings, ThreadState, TransportSettings,
};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(3);
pub const QUIET: Duration = Duration::from_millis(200);

pub struct Session {
    pub emulator: Emulator,
    pub client: LoopbackClient,
}

impl Session {
    pub fn start() -> Self {
        Self::with_tasks(TaskSettings::default())
    }

    pub fn with_tasks(tasks: TaskSettings) -> Self {
        let engine = Engine::builtin(&tasks).expect("builtin engine");
        Self::with_engine(engine)
    }

    pub fn with_engine(engine: Engine) -> Self {
        let mut emulator = Emulator::new(engine).with_settings(TransportSettings {
            poll_interval_ms: 10,
            ..Default::default()
        });
        let (endpoint, client) = loopback_pair("it");
        emulator.start(Box::new(endpoint)).expect("start");
        assert!(emulator.wait_until(ThreadState::Active, WAIT));
        Self { emulator, client }
    }

    /// Send one command and return everything up to the prompt
    pub fn ask(&self, cmd: &str) -> String {
        self.client.send_line(cmd).expect("send");
        self.client
            .read_until_prompt(b'>', WAIT)
            .unwrap_or_else(|| panic!("no prompt after {:?}", cmd))
    }

    /// Response without line terminator and prompt
    pub fn reply(&self, cmd: &str) -> String {
        let out = self.ask(cmd);
        out.trim_end_matches('>').trim_end_matches(['\r', '\n']).to_string()
    }
}
