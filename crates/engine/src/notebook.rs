//! Notebook facade: one session, any number of cells.

use std::time::Duration;

use crate::config::{Config, ExecutionConfig};
use crate::executor::CellExecutor;
use crate::language::{Language, Route};
use crate::output::ExecutionResult;
use crate::session::{SessionManager, SessionState, StartupFailure};

/// A stateful notebook backed by one interpreter session.
///
/// Cells of one notebook run one at a time in submission order and share
/// interpreter state. Separate notebooks share nothing.
///
/// ```rust,no_run
/// use nbexec::{Config, Language, Notebook};
///
/// # async fn demo() -> Result<(), nbexec::StartupFailure> {
/// let notebook = Notebook::new(&Config::default());
///
/// let result = notebook.run("x = 40 + 2\nprint(x)", Language::Executable, None).await?;
/// assert_eq!(result.output, "42\n");
///
/// notebook.terminate().await;
/// # Ok(())
/// # }
/// ```
pub struct Notebook {
    manager: SessionManager,
    execution: ExecutionConfig,
}

impl Notebook {
    /// Create a notebook. The backend starts on the first executable cell.
    pub fn new(config: &Config) -> Self {
        Self {
            manager: SessionManager::new(config.kernel.clone()),
            execution: config.execution.clone(),
        }
    }

    /// Run one cell.
    ///
    /// Passthrough cells are echoed back without touching the backend.
    /// `timeout` overrides the configured default; with neither the wait
    /// is unbounded. Only a backend that cannot be started is an error.
    pub async fn run(
        &self,
        code: &str,
        language: Language,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, StartupFailure> {
        match language.route() {
            Route::Echo => Ok(ExecutionResult::passthrough(code)),
            Route::Interpreter => {
                let timeout = timeout.or_else(|| self.execution.default_timeout());
                CellExecutor::new(&self.manager, self.execution.keep_len)
                    .execute(code, timeout)
                    .await
            }
        }
    }

    /// Start the backend now instead of on the first cell.
    pub async fn ensure(&self) -> Result<(), StartupFailure> {
        self.manager.ensure().await
    }

    /// Stop the backend. Idempotent.
    pub async fn terminate(&self) {
        self.manager.terminate().await;
    }

    /// Discard all interpreter state; the next cell starts a fresh backend.
    pub async fn reset(&self) {
        self.manager.reset().await;
    }

    /// Returns the session's lifecycle state.
    pub fn session_state(&self) -> SessionState {
        self.manager.state()
    }

    /// Returns true if a live backend is attached.
    pub fn has_session(&self) -> bool {
        self.manager.has_session()
    }

    /// Returns the backend pid while a session exists.
    pub fn pid(&self) -> Option<u32> {
        self.manager.pid()
    }

    /// Returns the execution counter of the last completed cell.
    pub fn execution_count(&self) -> Option<u32> {
        self.manager.execution_count()
    }
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
