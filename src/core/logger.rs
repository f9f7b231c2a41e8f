//! Wire traffic recording
//!
//! Records what crosses the virtual port, one entry per received command
//! line or written response, as text, hex dump or JSON lines.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Logger shared between the worker and its owner
pub type SharedTrafficLogger = Arc<Mutex<TrafficLogger>>;

/// Entries kept in memory by default
const DEFAULT_MAX_BUFFER: usize = 1000;

/// Traffic log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Plain text, control characters escaped
    #[default]
    Text,
    /// Hex dump
    Hex,
    /// JSON lines
    JsonLines,
}

impl LogFormat {
    /// File extension for format
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Text => "log",
            LogFormat::Hex => "hex",
            LogFormat::JsonLines => "jsonl",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "hex" => Ok(Self::Hex),
            "json" | "jsonl" | "json_lines" => Ok(Self::JsonLines),
            other => Err(format!("unknown traffic log format: {}", other)),
        }
    }
}

/// Data direction, seen from the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Client to emulator
    Received,
    /// Emulator to client
    Sent,
    /// Annotation
    Info,
}

impl Direction {
    fn tag(&self) -> &'static str {
        match self {
            Direction::Received => "RX",
            Direction::Sent => "TX",
            Direction::Info => "##",
        }
    }
}

/// A single traffic entry
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrafficEntry {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub data: Vec<u8>,
}

impl TrafficEntry {
    /// Create an entry stamped now
    pub fn new(direction: Direction, data: &[u8]) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            data: data.to_vec(),
        }
    }

    fn stamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    /// Text with `\r`/`\n` and other control bytes escaped
    pub fn to_text(&self) -> String {
        let text: String = self
            .data
            .iter()
            .map(|&b| match b {
                b'\r' => "\\r".to_string(),
                b'\n' => "\\n".to_string(),
                0x20..=0x7E => (b as char).to_string(),
                _ => format!("\\x{:02X}", b),
            })
            .collect();
        format!("[{}] {} {}", self.stamp(), self.direction.tag(), text)
    }

    /// Space-separated hex bytes
    pub fn to_hex(&self) -> String {
        let hex: Vec<String> = self.data.iter().map(|b| format!("{:02X}", b)).collect();
        format!("[{}] {} {}", self.stamp(), self.direction.tag(), hex.join(" "))
    }

    /// One JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Render in `format`
    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => self.to_text(),
            LogFormat::Hex => self.to_hex(),
            LogFormat::JsonLines => self.to_json(),
        }
    }
}

/// Traffic logger with an optional file sink and an in-memory ring
#[derive(Debug)]
pub struct TrafficLogger {
    file: Option<BufWriter<File>>,
    format: LogFormat,
    path: Option<PathBuf>,
    buffer: Vec<TrafficEntry>,
    max_buffer: usize,
    bytes_logged: usize,
    entries_logged: usize,
}

impl Default for TrafficLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficLogger {
    /// In-memory only
    pub fn new() -> Self {
        Self {
            file: None,
            format: LogFormat::Text,
            path: None,
            buffer: Vec::new(),
            max_buffer: DEFAULT_MAX_BUFFER,
            bytes_logged: 0,
            entries_logged: 0,
        }
    }

    /// Open `path` for appending
    pub fn to_file(path: &Path, format: LogFormat) -> io::Result<Self> {
        let mut logger = Self::new();
        logger.start(path, format)?;
        Ok(logger)
    }

    /// Wrap for sharing with the worker
    pub fn shared(self) -> SharedTrafficLogger {
        Arc::new(Mutex::new(self))
    }

    /// Start writing to `path`
    pub fn start(&mut self, path: &Path, format: LogFormat) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.file = Some(BufWriter::new(file));
        self.format = format;
        self.path = Some(path.to_path_buf());
        self.bytes_logged = 0;
        self.entries_logged = 0;
        tracing::info!("Traffic log at {}", path.display());
        Ok(())
    }

    /// Stop writing to file
    pub fn stop(&mut self) {
        self.flush();
        self.file = None;
    }

    /// Current log file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `data`
    pub fn log(&mut self, direction: Direction, data: &[u8]) {
        let entry = TrafficEntry::new(direction, data);

        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", entry.format(self.format)) {
                tracing::warn!("Traffic log write failed: {}", e);
            }
            self.bytes_logged += data.len();
            self.entries_logged += 1;
            if self.entries_logged % 100 == 0 {
                self.flush();
            }
        }

        self.buffer.push(entry);
        if self.buffer.len() > self.max_buffer {
            self.buffer.remove(0);
        }
    }

    /// Record a received command line
    pub fn log_rx(&mut self, data: &[u8]) {
        self.log(Direction::Received, data);
    }

    /// Record a written response
    pub fn log_tx(&mut self, data: &[u8]) {
        self.log(Direction::Sent, data);
    }

    /// Record an annotation
    pub fn log_info(&mut self, message: &str) {
        self.log(Direction::Info, message.as_bytes());
    }

    /// Recent entries
    pub fn entries(&self) -> &[TrafficEntry] {
        &self.buffer
    }

    /// (bytes, entries) written to file
    pub fn stats(&self) -> (usize, usize) {
        (self.bytes_logged, self.entries_logged)
    }

    /// Limit the in-memory ring
    pub fn set_max_buffer(&mut self, size: usize) {
        self.max_buffer = size;
        if self.buffer.len() > size {
            let excess = self.buffer.len() - size;
            self.buffer.drain(..excess);
        }
    }

    /// Flush to disk
    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                tracing::warn!("Traffic log flush failed: {}", e);
            }
        }
    }
}

impl Drop for TrafficLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
