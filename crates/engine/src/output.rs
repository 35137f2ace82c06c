//! Output collection and success classification.
//!
//! The backend reports a cell's output as a sequence of fragments (stream
//! text, display payloads, expression results, error reports). The
//! [`OutputCollector`] folds them, in arrival order, into a single
//! [`ExecutionResult`].

use std::borrow::Cow;
use std::time::Duration;

use protocol::{Event, ReplyStatus, StreamName, MIME_IMAGE_PNG, MIME_TEXT_PLAIN};
use serde::{Deserialize, Serialize};

/// Text that precedes an error report in a failed cell's output.
pub const FAILURE_MARKER: &str =
    "Executed code failed, please reflect on the cause of bug and then debug.";

/// Prefix of every timeout message.
pub const TIMEOUT_PREFIX: &str = "Cell execution timed out";

/// Output of a trailing coroutine that was never awaited.
pub const UNAWAITED_COROUTINE_MESSAGE: &str =
    "Executed code failed, you need use key word 'await' to run a async code.";

/// Default per-item character budget.
pub const DEFAULT_KEEP_LEN: usize = 2000;

/// Items containing this marker are full HTML documents and never truncated.
const HTML_DOCUMENT_MARKER: &str = "<!DOCTYPE html>";

/// Lines containing any of these (case-insensitive) are log noise.
const NOISE_MARKERS: &[&str] = &["[warning]", "warning:", "[cv]", "[info]"];

/// Result of running one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Normalized output text. Never absent; may be empty.
    pub output: String,
    /// False on exception, timeout or backend death.
    pub success: bool,
    /// Backend execution counter for this cell, when it got that far.
    pub execution_count: Option<u32>,
    /// Number of image payloads the cell displayed.
    pub images: usize,
}

impl ExecutionResult {
    /// Result for a passthrough cell: the text itself, successful.
    pub fn passthrough(text: impl Into<String>) -> Self {
        Self {
            output: text.into(),
            success: true,
            execution_count: None,
            images: 0,
        }
    }

    /// Result for a cell that exceeded its time limit.
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            output: format!(
                "{} after {}s: execution exceeded the time limit and was interrupted; \
                 consider optimizing your code for better performance.",
                TIMEOUT_PREFIX,
                format_secs(limit)
            ),
            success: false,
            execution_count: None,
            images: 0,
        }
    }

    /// Returns true if this result reports a timeout.
    pub fn is_timeout(&self) -> bool {
        !self.success && self.output.starts_with(TIMEOUT_PREFIX)
    }
}

/// One output item before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// Coalesced text from one stream.
    Stream(StreamName, String),
    /// Plain text of a result or display payload.
    Text(String),
    /// Formatted traceback.
    Error(String),
    /// Host-side failure description (e.g. backend death).
    Failure(String),
}

/// Accumulates the fragments of one cell and classifies the outcome.
#[derive(Debug, Clone)]
pub struct OutputCollector {
    items: Vec<Item>,
    keep_len: usize,
    execution_count: Option<u32>,
    images: usize,
    errored: bool,
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_LEN)
    }
}

impl OutputCollector {
    /// Create a collector that keeps at most `keep_len` characters per item.
    pub fn new(keep_len: usize) -> Self {
        Self {
            items: Vec::new(),
            keep_len,
            execution_count: None,
            images: 0,
            errored: false,
        }
    }

    /// Returns true once an error fragment has been seen.
    pub fn has_error(&self) -> bool {
        self.errored
    }

    /// Returns the number of items collected so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Feed one backend event. Events that carry no output are ignored.
    pub fn push(&mut self, event: &Event) {
        match event {
            Event::Stream(stream) => self.push_stream(stream.name, &stream.text),
            Event::DisplayData(display) => {
                if display.data.contains_key(MIME_IMAGE_PNG) {
                    self.images += 1;
                } else if let Some(text) = display.data.get(MIME_TEXT_PLAIN) {
                    self.items.push(Item::Text(text.clone()));
                }
            }
            Event::ExecuteResult(result) => {
                self.execution_count = Some(result.execution_count);
                if let Some(text) = result.data.get(MIME_TEXT_PLAIN) {
                    self.items.push(Item::Text(text.clone()));
                }
            }
            Event::Error(report) => {
                self.errored = true;
                self.items.push(Item::Error(report.traceback.join("\n")));
            }
            Event::ExecuteReply(reply) => {
                self.execution_count = Some(reply.execution_count);
                if reply.status == ReplyStatus::Error && !self.errored {
                    // A failed reply without a report still fails the cell.
                    self.errored = true;
                    self.items.push(Item::Error(String::new()));
                }
            }
            Event::Ready(_) | Event::ShutdownReply => {}
        }
    }

    fn push_stream(&mut self, name: StreamName, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Item::Stream(last, buffer)) = self.items.last_mut() {
            if *last == name {
                buffer.push_str(text);
                return;
            }
        }
        self.items.push(Item::Stream(name, text.to_string()));
    }

    /// Produce the final result.
    pub fn finish(self) -> ExecutionResult {
        let mut success = true;
        let mut parts = Vec::with_capacity(self.items.len());

        for item in self.items {
            let part = match item {
                Item::Stream(name, text) => {
                    let text = strip_ansi(&text).into_owned();
                    if success && text.trim_start().starts_with("<coroutine object") {
                        success = false;
                        Part::Block(UNAWAITED_COROUTINE_MESSAGE.to_string())
                    } else {
                        Part::Stream(name, truncate(&text, self.keep_len, success).into_owned())
                    }
                }
                Item::Text(text) => {
                    let text = strip_ansi(&text).into_owned();
                    if success && text.trim_start().starts_with("<coroutine object") {
                        success = false;
                        Part::Block(UNAWAITED_COROUTINE_MESSAGE.to_string())
                    } else {
                        Part::Block(truncate(&text, self.keep_len, success).into_owned())
                    }
                }
                Item::Error(traceback) => {
                    success = false;
                    let traceback = strip_ansi(&traceback);
                    let traceback = truncate(&traceback, self.keep_len, false);
                    if traceback.is_empty() {
                        Part::Block(FAILURE_MARKER.to_string())
                    } else {
                        Part::Block(format!("{}\n{}", FAILURE_MARKER, traceback))
                    }
                }
                Item::Failure(message) => {
                    success = false;
                    Part::Block(message)
                }
            };
            parts.push(part);
        }

        if success {
            // Warnings and log records land on stderr; stdout stays verbatim.
            for part in parts.iter_mut() {
                if let Part::Stream(StreamName::Stderr, text) = part {
                    let cleaned = match remove_noise_lines(text) {
                        Cow::Owned(cleaned) => Some(cleaned),
                        Cow::Borrowed(_) => None,
                    };
                    if let Some(cleaned) = cleaned {
                        *text = cleaned;
                    }
                }
            }
        }

        ExecutionResult {
            output: join_parts(&parts),
            success,
            execution_count: self.execution_count,
            images: self.images,
        }
    }

    /// Produce a failed result, appending `message` after whatever was
    /// collected so far.
    pub fn finish_with_failure(mut self, message: impl Into<String>) -> ExecutionResult {
        self.items.push(Item::Failure(message.into()));
        self.finish()
    }
}

/// A normalized item, ready to be joined.
#[derive(Debug)]
enum Part {
    /// Raw stream text, concatenated exactly as written.
    Stream(StreamName, String),
    /// Result, display or error text, kept on its own line.
    Block(String),
}

impl Part {
    fn text(&self) -> &str {
        match self {
            Part::Stream(_, text) | Part::Block(text) => text,
        }
    }
}

/// Concatenate parts in order. Stream text is joined as is; a newline is
/// inserted only next to a block that would otherwise share a line.
fn join_parts(parts: &[Part]) -> String {
    let mut output = String::with_capacity(parts.iter().map(|p| p.text().len() + 1).sum());
    let mut previous_is_block = false;
    for part in parts.iter().filter(|p| !p.text().is_empty()) {
        let is_block = matches!(part, Part::Block(_));
        if (is_block || previous_is_block) && !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(part.text());
        previous_is_block = is_block;
    }
    output
}

/// Keep the head (`keep_head`) or the tail of `text`, at most `keep_len`
/// characters.
fn truncate(text: &str, keep_len: usize, keep_head: bool) -> Cow<'_, str> {
    if text.contains(HTML_DOCUMENT_MARKER) {
        return Cow::Borrowed(text);
    }
    let count = text.chars().count();
    if count <= keep_len {
        return Cow::Borrowed(text);
    }
    if keep_head {
        let end = text
            .char_indices()
            .nth(keep_len)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        Cow::Borrowed(&text[..end])
    } else {
        let start = text
            .char_indices()
            .nth(count - keep_len)
            .map(|(i, _)| i)
            .unwrap_or(0);
        Cow::Borrowed(&text[start..])
    }
}

/// Drop log and warning lines. Text without such lines is returned as is.
fn remove_noise_lines(text: &str) -> Cow<'_, str> {
    let is_noise = |line: &str| {
        let lower = line.to_lowercase();
        NOISE_MARKERS.iter().any(|marker| lower.contains(marker))
    };

    if !text.lines().any(is_noise) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(
        text.split_inclusive('\n')
            .filter(|line| !is_noise(line))
            .collect(),
    )
}

/// Remove ANSI escape sequences (CSI, OSC and two-byte escapes).
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if !text.contains('\u{1b}') {
        return Cow::Borrowed(text);
    }

    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('[') => {
                // CSI: parameters and intermediates, then a final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                // OSC: terminated by BEL or ST (ESC \)
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    Cow::Owned(output)
}

fn format_secs(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{:.1}", secs)
    }
}
