//! Session lifecycle states.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a notebook's backend session.
///
/// ```text
/// Unborn ──▶ Starting ──▶ Ready ⇄ Executing
///               │           │        │
///               ▼           ▼        ▼
///       (prior state)   Terminated ◀─┘
///                           │
///                           └──▶ Starting (next run)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No backend has ever been started.
    Unborn,
    /// A backend is being spawned.
    Starting,
    /// A backend is alive and idle.
    Ready,
    /// A backend is running a cell.
    Executing,
    /// The backend was stopped or died. The next run starts a fresh one.
    Terminated,
}

impl SessionState {
    /// Returns true if a live backend is attached.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Executing)
    }

    /// Returns the state name as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unborn => "unborn",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Terminated => "terminated",
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Unborn
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
