//! # nbexec
//!
//! Stateful, sandboxed cell execution against a persistent interpreter
//! session.
//!
//! ## Overview
//!
//! A [`Notebook`] runs caller-supplied code cells against one long-lived
//! interpreter process and returns the captured output together with a
//! success flag:
//!
//! - **Session Management**: lazy start, liveness, FIFO access, idempotent
//!   terminate and reset, with the whole backend process group reaped
//! - **Cell Execution**: per-cell timeouts that interrupt the backend
//!   without tearing the session down
//! - **Output Collection**: ordered, normalized text plus failure
//!   classification
//! - **Language Routing**: passthrough cells are echoed, never executed
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Notebook                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Language ──▶ Echo ───────────────────────────▶ Result       │
//! │      │                                            ▲          │
//! │      ▼                                            │          │
//! │  CellExecutor ──▶ SessionManager ──▶ Kernel ──▶ OutputCollector
//! │                    (FIFO lock)      (python3 + driver)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use nbexec::{Config, Language, Notebook};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let notebook = Notebook::new(&Config::default());
//!
//!     notebook.run("x = 1\ny = 2", Language::Executable, None).await?;
//!     let result = notebook
//!         .run("print(x + y)", Language::Executable, Some(Duration::from_secs(5)))
//!         .await?;
//!     assert!(result.success);
//!     assert_eq!(result.output, "3\n");
//!
//!     notebook.terminate().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Backend process and session lifecycle
//! - [`executor`]: Running one cell with a timeout
//! - [`output`]: Output normalization and classification
//! - [`language`]: Cell language tags and routing
//! - [`notebook`]: The public facade

pub mod config;
pub mod executor;
pub mod language;
pub mod notebook;
pub mod output;
pub mod session;

pub use config::{Config, ConfigError};
pub use executor::CellExecutor;
pub use language::{Language, LanguageError, Route};
pub use notebook::Notebook;
pub use output::{ExecutionResult, OutputCollector, FAILURE_MARKER, TIMEOUT_PREFIX};
pub use session::{SessionManager, SessionState, StartupFailure};
