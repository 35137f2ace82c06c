//! Session management module.
//!
//! This module spawns the interpreter backend and owns its lifecycle:
//! lazy start, liveness, serialized access, termination and reset.

pub mod kernel;
pub mod manager;
pub mod state;

pub use kernel::{describe_status, Kernel, KillHandle, StartupFailure, SubmitError};
pub use manager::{SessionLease, SessionManager};
pub use state::SessionState;
