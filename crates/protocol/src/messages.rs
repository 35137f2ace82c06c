//! Protocol message definitions for the nbexec backend.
//!
//! The host sends [`Request`]s to the interpreter driver on its stdin and
//! reads [`Event`]s back from its stdout. Both directions are JSON objects
//! discriminated by a `type` field, one object per line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current protocol version.
///
/// The driver announces its version in [`Ready`]; the host refuses to use a
/// backend that speaks a different one.
pub const PROTOCOL_VERSION: u32 = 1;

/// MIME type for plain text payloads.
pub const MIME_TEXT_PLAIN: &str = "text/plain";

/// MIME type for HTML payloads.
pub const MIME_TEXT_HTML: &str = "text/html";

/// MIME type for base64-encoded PNG payloads.
pub const MIME_IMAGE_PNG: &str = "image/png";

/// A rich output bundle keyed by MIME type.
pub type MimeBundle = BTreeMap<String, String>;

// ============================================================================
// Requests (host to backend)
// ============================================================================

/// A request from the host to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Execute one cell of code in the persistent namespace.
    Execute(ExecuteRequest),
    /// Acknowledge and exit.
    Shutdown,
}

/// Request to execute one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Identifier echoed back as `parent` on every event for this cell.
    pub msg_id: String,
    /// Source code of the cell.
    pub code: String,
}

impl Request {
    /// Build an execute request.
    pub fn execute(msg_id: impl Into<String>, code: impl Into<String>) -> Self {
        Request::Execute(ExecuteRequest {
            msg_id: msg_id.into(),
            code: code.into(),
        })
    }
}

// ============================================================================
// Events (backend to host)
// ============================================================================

/// An event emitted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The backend finished starting and is waiting for requests.
    Ready(Ready),
    /// Text written to stdout or stderr by cell code.
    Stream(Stream),
    /// A rich display payload produced by `display(...)`.
    DisplayData(DisplayData),
    /// The value of a trailing bare expression.
    ExecuteResult(ExecuteResult),
    /// An exception raised by cell code.
    Error(ErrorReport),
    /// Completion signal for one execute request.
    ExecuteReply(ExecuteReply),
    /// Acknowledgement of [`Request::Shutdown`].
    ShutdownReply,
}

impl Event {
    /// Returns the `msg_id` of the request this event belongs to, if any.
    pub fn parent(&self) -> Option<&str> {
        match self {
            Event::Stream(e) => Some(&e.parent),
            Event::DisplayData(e) => Some(&e.parent),
            Event::ExecuteResult(e) => Some(&e.parent),
            Event::Error(e) => Some(&e.parent),
            Event::ExecuteReply(e) => Some(&e.parent),
            Event::Ready(_) | Event::ShutdownReply => None,
        }
    }

    /// Returns true if this event terminates the request it belongs to.
    pub fn is_completion(&self) -> bool {
        matches!(self, Event::ExecuteReply(_))
    }
}

/// Startup announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Protocol version spoken by the driver.
    pub protocol_version: u32,
    /// Process ID of the interpreter.
    pub pid: u32,
    /// Interpreter version string, e.g. `3.12.1`.
    pub language_version: String,
}

/// Output stream name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Text written to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Request this output belongs to.
    pub parent: String,
    /// Which stream was written.
    pub name: StreamName,
    /// The text, exactly as written.
    pub text: String,
}

/// Rich display payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayData {
    /// Request this output belongs to.
    pub parent: String,
    /// Payload representations keyed by MIME type.
    pub data: MimeBundle,
}

/// Value of the last expression in a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Request this output belongs to.
    pub parent: String,
    /// Execution counter of the cell that produced the value.
    pub execution_count: u32,
    /// Value representations keyed by MIME type.
    pub data: MimeBundle,
}

/// Structured exception report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Request this output belongs to.
    pub parent: String,
    /// Exception type name, e.g. `KeyError`.
    pub ename: String,
    /// Exception message.
    pub evalue: String,
    /// Formatted traceback lines; the last one is `ename: evalue`.
    pub traceback: Vec<String>,
}

/// Completion status of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// The cell ran to completion.
    Ok,
    /// The cell raised.
    Error,
}

/// Completion signal for one execute request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteReply {
    /// Request that completed.
    pub parent: String,
    /// How it completed.
    pub status: ReplyStatus,
    /// Execution counter after this cell.
    pub execution_count: u32,
}
