//! Configuration module
//!
//! Emulator settings file and engine construction from it

mod settings;

pub use settings::{ConfigError, EmulatorConfig, LogOutput, LoggingConfig, SessionConfig};

use crate::core::engine::Engine;
use crate::core::error::Result;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "elmulator", "Elmulator").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default configuration file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

impl EmulatorConfig {
    /// Build an engine: built-in catalog, scenario files, then session values
    ///
    /// The scenario is selected last so it may come from a scenario file.
    pub fn build_engine(&self) -> Result<Engine> {
        let mut engine = Engine::builtin(&self.tasks)?;
        for path in &self.scenario_files {
            engine.merge_file(path)?;
        }
        engine.set_scenario(&self.session.scenario)?;
        engine.set_delay(Duration::from_millis(self.session.delay_ms));
        engine.set_request_timeout(Duration::from_secs(self.session.request_timeout_secs));
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EmulatorError;

    #[test]
    fn test_build_engine_with_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cold.yaml");
        std::fs::write(
            &path,
            "cold:\n  ENGINE_COOLANT_TEMP:\n    pattern: \"0105\"\n    response: \"<header>7E8</header><size>03</size><data>41 05 10</data>\"\n",
        )
        .unwrap();

        let mut config = EmulatorConfig::default();
        config.scenario_files.push(path);
        config.session.scenario = "cold".into();
        config.session.delay_ms = 5;

        let engine = config.build_engine().unwrap();
        assert_eq!(engine.scenario(), "cold");
        assert_eq!(engine.delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_build_engine_unknown_scenario() {
        let mut config = EmulatorConfig::default();
        config.session.scenario = "nope".into();
        assert!(matches!(
            config.build_engine(),
            Err(EmulatorError::UnknownScenario(_))
        ));
    }
}
