//! Byte framing for the adapter command line
//!
//! Bytes accumulate until a carriage return. Line feeds are dropped, and a
//! gap longer than the request timeout between two bytes of the same line
//! discards what was buffered so far.

use std::time::{Duration, Instant};

/// Line terminator sent by clients
pub const CR: u8 = b'\r';
/// Ignored on input
pub const LF: u8 = b'\n';

/// Accumulates received bytes into command lines
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
    last_byte: Option<Instant>,
    discarded: usize,
}

impl LineReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte received at `now`
    ///
    /// Returns the raw line (without terminator) once `\r` arrives.
    pub fn push(&mut self, byte: u8, now: Instant, timeout: Duration) -> Option<Vec<u8>> {
        if let Some(previous) = self.last_byte {
            if now.saturating_duration_since(previous) > timeout && !self.buffer.is_empty() {
                tracing::debug!(
                    "Request timeout, discarding {} buffered bytes",
                    self.buffer.len()
                );
                self.buffer.clear();
                self.discarded += 1;
            }
        }

        match byte {
            CR => {
                self.last_byte = None;
                Some(std::mem::take(&mut self.buffer))
            }
            LF => {
                self.last_byte = Some(now);
                None
            }
            _ => {
                self.buffer.push(byte);
                self.last_byte = Some(now);
                None
            }
        }
    }

    /// Bytes buffered for the current line
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of partial lines dropped by the request timeout
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

/// A completed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Empty line: repeat the last command
    Repeat,
    /// Sanitized command
    Command(String),
    /// Line with characters outside the accepted set
    Invalid(String),
}

/// Classify a raw line
pub fn classify(raw: &[u8]) -> Line {
    if !raw.iter().all(|&b| b.is_ascii_alphanumeric() || b == b' ') {
        return Line::Invalid(String::from_utf8_lossy(raw).into_owned());
    }
    // only ASCII left, so this cannot fail
    let text = String::from_utf8_lossy(raw);
    let cmd = sanitize(&text);
    if cmd.is_empty() {
        Line::Repeat
    } else {
        Line::Command(cmd)
    }
}

/// Drop all whitespace and uppercase: `"01 0c"` becomes `"010C"`
pub fn sanitize(cmd: &str) -> String {
    cmd.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn feed(reader: &mut LineReader, bytes: &[u8], at: Instant) -> Vec<Vec<u8>> {
        bytes
            .iter()
            .filter_map(|&b| reader.push(b, at, TIMEOUT))
            .collect()
    }

    #[test]
    fn test_lines_and_linefeeds() {
        let mut reader = LineReader::new();
        let now = Instant::now();
        let lines = feed(&mut reader, b"01 00\r\nATZ\r", now);
        assert_eq!(lines, vec![b"01 00".to_vec(), b"ATZ".to_vec()]);
        assert!(reader.pending().is_empty());
    }

    #[test]
    fn test_timeout_discards_partial_line() {
        let mut reader = LineReader::new();
        let start = Instant::now();
        assert!(feed(&mut reader, b"01", start).is_empty());

        let late = start + TIMEOUT + Duration::from_millis(1);
        let lines = feed(&mut reader, b"0D\r", late);
        assert_eq!(lines, vec![b"0D".to_vec()]);
        assert_eq!(reader.discarded(), 1);
    }

    #[test]
    fn test_first_byte_never_times_out() {
        let mut reader = LineReader::new();
        let start = Instant::now();
        feed(&mut reader, b"ATZ\r", start);

        let later = start + TIMEOUT * 10;
        assert_eq!(feed(&mut reader, b"ATI\r", later), vec![b"ATI".to_vec()]);
        assert_eq!(reader.discarded(), 0);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(b""), Line::Repeat);
        assert_eq!(classify(b"   "), Line::Repeat);
        assert_eq!(classify(b"01 0c"), Line::Command("010C".into()));
        assert_eq!(classify(b"at sh 7e0"), Line::Command("ATSH7E0".into()));
        assert_eq!(classify(b"01;00"), Line::Invalid("01;00".into()));
        assert_eq!(classify(b"AT\tZ"), Line::Invalid("AT\tZ".into()));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(" 09 02 "), "0902");
        assert_eq!(sanitize("atdpn"), "ATDPN");
    }
}
