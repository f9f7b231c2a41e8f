//! Elmulator - ELM327 adapter emulator
//!
//! Creates a virtual serial port and answers OBD-II/UDS requests on it
//! until interrupted.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use elmulator_core::config::{self, EmulatorConfig, LogOutput};
use elmulator_core::{CliResult, Emulator, LogFormat, ThreadState, TrafficLogger};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Diagnostic log output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    /// Human-readable text
    Text,
    /// JSON lines
    Json,
}

/// Elmulator CLI
#[derive(Parser, Debug)]
#[command(
    name = "elmulator",
    version,
    about = "ELM327 OBD-II/UDS adapter emulator on a virtual serial port",
    long_about = None
)]
struct Args {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, env = "ELMULATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Initial scenario
    #[arg(short, long, env = "ELMULATOR_SCENARIO")]
    scenario: Option<String>,

    /// Response delay in milliseconds
    #[arg(short, long)]
    delay: Option<u64>,

    /// Request timeout in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Scenario file to merge (YAML, JSON or TOML), repeatable
    #[arg(long = "scenario-file")]
    scenario_files: Vec<PathBuf>,

    /// Backing file for emulated ECU memory
    #[arg(long)]
    memory_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Record wire traffic to this file
    #[arg(long)]
    traffic_log: Option<PathBuf>,

    /// Traffic log format (text, hex, json)
    #[arg(long)]
    traffic_format: Option<LogFormat>,

    /// Print a JSON counter snapshot on exit
    #[arg(long)]
    dump_counters: bool,
}

impl Args {
    /// Command-line values override the file
    fn apply(&self, config: &mut EmulatorConfig) {
        if let Some(scenario) = &self.scenario {
            config.session.scenario = scenario.clone();
        }
        if let Some(delay) = self.delay {
            config.session.delay_ms = delay;
        }
        if let Some(timeout) = self.request_timeout {
            config.session.request_timeout_secs = timeout;
        }
        config.scenario_files.extend(self.scenario_files.iter().cloned());
        if let Some(file) = &self.memory_file {
            config.tasks.memory.file = Some(file.clone());
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        match self.log_format {
            Some(LogFormatArg::Json) => config.logging.format = LogOutput::Json,
            Some(LogFormatArg::Text) => config.logging.format = LogOutput::Text,
            None => {}
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if let Some(file) = &self.traffic_log {
            config.logging.traffic_log = Some(file.clone());
        }
        if let Some(format) = self.traffic_format {
            config.logging.traffic_format = format;
        }
    }
}

fn init_tracing(logging: &config::LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log level")?;
    let json = logging.format == LogOutput::Json;

    let Some(path) = &logging.file else {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        if json {
            builder.json().init();
        } else {
            builder.init();
        }
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let name = path
        .file_name()
        .context("log file path has no file name")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(Some(guard))
}

fn load_config(args: &Args) -> anyhow::Result<EmulatorConfig> {
    let mut config = match &args.config {
        Some(path) => EmulatorConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EmulatorConfig::load().context("loading config")?,
    };
    args.apply(&mut config);
    Ok(config)
}

#[cfg(unix)]
fn run(args: &Args, config: &EmulatorConfig) -> anyhow::Result<()> {
    let engine = config.build_engine().context("building emulator")?;
    let mut emulator = Emulator::new(engine).with_settings(config.transport.clone());

    if let Some(path) = &config.logging.traffic_log {
        let traffic = TrafficLogger::to_file(path, config.logging.traffic_format)
            .with_context(|| format!("opening traffic log {}", path.display()))?;
        emulator = emulator.with_traffic_log(traffic.shared());
    }

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;

    let port = emulator.start_pty().context("starting emulator")?;
    println!("{}", port);
    tracing::info!(
        "Elmulator v{} serving scenario {} on {}",
        elmulator_core::VERSION,
        emulator.scenario(),
        port
    );

    // Wait for Ctrl-C, or for the worker to end on its own
    loop {
        if stop_rx
            .recv_timeout(std::time::Duration::from_millis(250))
            .is_ok()
        {
            tracing::info!("Interrupted, stopping");
            break;
        }
        if emulator.thread_state() == ThreadState::Stopped {
            tracing::warn!("Worker stopped");
            break;
        }
    }
    emulator.stop();

    if args.dump_counters {
        let snapshot = serde_json::to_string_pretty(&emulator.counters())
            .context("serializing counters")?;
        println!("{}", snapshot);
    }
    Ok(())
}

#[cfg(not(unix))]
fn run(_args: &Args, _config: &EmulatorConfig) -> anyhow::Result<()> {
    anyhow::bail!("virtual serial ports require a Unix PTY")
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return CliResult::config_error(format!("{:#}", e)).to_exit_code();
        }
    };

    let _guard = match init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return CliResult::config_error(format!("{:#}", e)).to_exit_code();
        }
    };

    let result = match run(&args, &config) {
        Ok(()) => CliResult::success(),
        Err(e) => CliResult::from(e),
    };
    if let Some(message) = result.message() {
        if !result.is_success() {
            tracing::error!("{}", message);
            eprintln!("Error: {}", message);
        }
    }
    result.to_exit_code()
}
