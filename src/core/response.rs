//! Write-time response rendering
//!
//! Rule and task responses are templates. Plain text passes through; tags
//! add structure that depends on the adapter flags in force when the
//! response is written:
//!
//! - `<header>H</header><size>LL</size><data>..</data>` one CAN frame
//!   (header shown with ATH1, PCI shown with ATH1 or ATCAF0)
//! - `<string>text</string>` literal text
//! - `<writeln>text</writeln>` text followed by a line break
//! - `<eval>name</eval>` value produced at write time
//!
//! A carriage return inside plain text also breaks the line.

use super::counters::{self, Counters};

const TAGS: [&str; 6] = ["header", "size", "data", "string", "writeln", "eval"];

/// Maximum bytes per single frame
const SINGLE_FRAME_MAX: usize = 7;
/// Payload bytes carried by a first frame
const FIRST_FRAME_BYTES: usize = 6;
/// Payload bytes carried by a consecutive frame
const CONSECUTIVE_FRAME_BYTES: usize = 7;

/// Adapter flags that shape the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    /// ATS: spaces between bytes
    pub spaces: bool,
    /// ATH: CAN headers shown
    pub headers: bool,
    /// ATCAF: PCI bytes handled by the adapter
    pub can_auto_format: bool,
    /// ATL: line feed after carriage return
    pub linefeeds: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            spaces: true,
            headers: false,
            can_auto_format: true,
            linefeeds: false,
        }
    }
}

impl RenderSettings {
    /// Flags as currently set in `counters`
    pub fn from_counters(counters: &Counters) -> Self {
        let defaults = Self::default();
        Self {
            spaces: counters.flag(counters::SPACES, defaults.spaces),
            headers: counters.flag(counters::SHOW_HEADERS, defaults.headers),
            can_auto_format: counters.flag(counters::CAN_AUTO_FORMAT, defaults.can_auto_format),
            linefeeds: counters.flag(counters::LINEFEEDS, defaults.linefeeds),
        }
    }

    /// Line terminator
    pub fn eol(&self) -> &'static str {
        if self.linefeeds {
            "\r\n"
        } else {
            "\r"
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Tag(&'a str, &'a str),
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('<') {
        if let Some((name, body, consumed)) = tag_at(&rest[open..]) {
            if open > 0 {
                out.push(Segment::Text(&rest[..open]));
            }
            out.push(Segment::Tag(name, body));
            rest = &rest[open + consumed..];
        } else {
            out.push(Segment::Text(&rest[..=open]));
            rest = &rest[open + 1..];
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

/// Parse `<name>body</name>` at the start of `s`: (name, body, bytes consumed)
fn tag_at(s: &str) -> Option<(&str, &str, usize)> {
    let end = s.find('>')?;
    let name = &s[1..end];
    if !TAGS.contains(&name) {
        return None;
    }
    let body_start = end + 1;
    let close = format!("</{}>", name);
    let body_len = s[body_start..].find(&close)?;
    Some((
        name,
        &s[body_start..body_start + body_len],
        body_start + body_len + close.len(),
    ))
}

/// Split data text into byte tokens (`"4100BE"` and `"41 00 BE"` alike)
fn data_bytes(data: &str) -> Vec<String> {
    data.split_whitespace()
        .flat_map(|token| {
            token
                .as_bytes()
                .chunks(2)
                .map(|c| String::from_utf8_lossy(c).to_uppercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn frame_lines(
    header: Option<&str>,
    size: Option<&str>,
    data: &str,
    settings: &RenderSettings,
) -> Vec<String> {
    let bytes = data_bytes(data);
    let prefix: Vec<String> = match header {
        Some(h) if settings.headers => vec![h.to_uppercase()],
        _ => Vec::new(),
    };
    let line = |parts: Vec<String>| {
        let mut all = prefix.clone();
        all.extend(parts);
        all.join(" ")
    };

    // no size: the data is already a raw frame (flow control and the like)
    let Some(size) = size else {
        return vec![line(bytes)];
    };
    let declared = usize::from_str_radix(size.trim(), 16).unwrap_or(bytes.len());
    let show_pci = settings.headers || !settings.can_auto_format;

    if bytes.len() <= SINGLE_FRAME_MAX {
        if show_pci {
            let mut parts = vec![format!("{:02X}", declared)];
            parts.extend(bytes);
            return vec![line(parts)];
        }
        return vec![line(bytes)];
    }

    let (first, tail) = bytes.split_at(FIRST_FRAME_BYTES);
    let mut lines = Vec::new();

    if show_pci {
        let mut parts = vec![
            format!("1{:X}", (declared >> 8) & 0x0F),
            format!("{:02X}", declared & 0xFF),
        ];
        parts.extend_from_slice(first);
        lines.push(line(parts));
        for (i, chunk) in tail.chunks(CONSECUTIVE_FRAME_BYTES).enumerate() {
            let mut parts = vec![format!("2{:X}", (i + 1) & 0x0F)];
            parts.extend_from_slice(chunk);
            lines.push(line(parts));
        }
    } else {
        lines.push(format!("{:03X}", declared));
        lines.push(format!("0: {}", first.join(" ")));
        for (i, chunk) in tail.chunks(CONSECUTIVE_FRAME_BYTES).enumerate() {
            lines.push(format!("{:X}: {}", (i + 1) & 0x0F, chunk.join(" ")));
        }
    }
    lines
}

struct Lines {
    done: Vec<String>,
    current: String,
}

impl Lines {
    fn text(&mut self, text: &str) {
        let mut parts = text.split('\r');
        if let Some(first) = parts.next() {
            self.current.push_str(&first.replace('\n', ""));
        }
        for part in parts {
            self.line_break();
            self.current.push_str(&part.replace('\n', ""));
        }
    }

    fn line_break(&mut self) {
        self.done.push(std::mem::take(&mut self.current));
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.line_break();
        }
    }
}

/// Render `template` into output lines
///
/// `eval` resolves `<eval>` names; unknown names render empty.
pub fn render_lines<F>(template: &str, settings: &RenderSettings, eval: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut lines = Lines {
        done: Vec::new(),
        current: String::new(),
    };
    let mut header: Option<&str> = None;
    let mut size: Option<&str> = None;

    for segment in segments(template) {
        match segment {
            Segment::Text(text) | Segment::Tag("string", text) => lines.text(text),
            Segment::Tag("writeln", text) => {
                lines.text(text);
                lines.line_break();
            }
            Segment::Tag("eval", name) => match eval(name.trim()) {
                Some(value) => lines.text(&value),
                None => tracing::warn!("No evaluator named {:?}", name),
            },
            Segment::Tag("header", h) => header = Some(h.trim()),
            Segment::Tag("size", s) => size = Some(s.trim()),
            Segment::Tag("data", data) => {
                lines.flush();
                lines
                    .done
                    .extend(frame_lines(header.take(), size.take(), data, settings));
            }
            Segment::Tag(_, text) => lines.text(text),
        }
    }
    lines.flush();

    if !settings.spaces {
        for line in &mut lines.done {
            line.retain(|c| !c.is_whitespace());
        }
    }
    lines.done
}

/// Assemble the bytes written to the client: lines, terminators, prompt
///
/// An empty response yields the prompt alone.
pub fn compose_output(lines: &[String], settings: &RenderSettings, prompt: &str) -> String {
    if lines.is_empty() {
        return prompt.to_string();
    }
    let eol = settings.eol();
    let mut out = lines.join(eol);
    out.push_str(eol);
    out.push_str(prompt);
    out
}
