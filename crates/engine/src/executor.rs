//! Runs one cell against a notebook's session.
//!
//! # Timeouts
//!
//! A timeout only ends the caller's wait. The backend is sent SIGINT and
//! given `interrupt_grace` to acknowledge the interrupted cell; whatever it
//! prints afterwards carries the old `msg_id` and is dropped by the next
//! cell. The session is torn down only if the backend actually died.

use std::time::{Duration, Instant};

use protocol::Request;
use uuid::Uuid;

use crate::output::{ExecutionResult, OutputCollector};
use crate::session::{
    describe_status, Kernel, SessionLease, SessionManager, StartupFailure, SubmitError,
};

/// How a wait for a cell's completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Died,
}

/// Executes cells on the session owned by a [`SessionManager`].
pub struct CellExecutor<'a> {
    manager: &'a SessionManager,
    keep_len: usize,
    interrupt_grace: Duration,
}

impl<'a> CellExecutor<'a> {
    /// Creates an executor bound to `manager`.
    pub fn new(manager: &'a SessionManager, keep_len: usize) -> Self {
        Self {
            manager,
            keep_len,
            interrupt_grace: manager.config().interrupt_grace(),
        }
    }

    /// Run `code` and wait for it to finish, at most `timeout` if given.
    ///
    /// Waits behind cells already submitted to the same session. Only a
    /// failure to start the backend is returned as `Err`.
    pub async fn execute(
        &self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, StartupFailure> {
        let mut lease = self.manager.lease().await?;

        let stale = lease.drain_stale();
        if stale > 0 {
            tracing::debug!(pid = lease.pid(), count = stale, "Discarded stale kernel events");
        }

        let msg_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut collector = OutputCollector::new(self.keep_len);

        lease.begin_execution();
        tracing::debug!(pid = lease.pid(), msg_id = %msg_id, "Executing cell");

        let submitted = lease.send(&Request::execute(&msg_id, code)).await;
        match submitted {
            Ok(()) => {}
            Err(SubmitError::Encode(e)) => {
                tracing::warn!(msg_id = %msg_id, error = %e, "Failed to encode cell");
                return Ok(collector.finish_with_failure(format!("Failed to submit cell: {}", e)));
            }
            Err(SubmitError::Io(e)) => {
                tracing::warn!(msg_id = %msg_id, error = %e, "Failed to write cell to kernel");
                return Ok(backend_died(lease, collector).await);
            }
        }

        let outcome = match timeout {
            Some(limit) => {
                let waited =
                    tokio::time::timeout(limit, collect(&mut lease, &msg_id, &mut collector)).await;
                match waited {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(
                            pid = lease.pid(),
                            msg_id = %msg_id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Cell timed out, interrupting"
                        );
                        self.interrupt(lease, &msg_id).await;
                        return Ok(ExecutionResult::timed_out(limit));
                    }
                }
            }
            None => collect(&mut lease, &msg_id, &mut collector).await,
        };

        match outcome {
            Outcome::Completed => {
                let result = collector.finish();
                if let Some(count) = result.execution_count {
                    lease.record_execution(count);
                }
                tracing::debug!(
                    msg_id = %msg_id,
                    execution_count = ?result.execution_count,
                    success = result.success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Cell finished"
                );
                Ok(result)
            }
            Outcome::Died => Ok(backend_died(lease, collector).await),
        }
    }

    /// Interrupt a timed-out cell and wait briefly for the backend to settle.
    async fn interrupt(&self, mut lease: SessionLease<'_>, msg_id: &str) {
        if !lease.kill_handle().interrupt() {
            lease.discard().await;
            return;
        }

        let mut discarded = OutputCollector::new(0);
        let settled = tokio::time::timeout(
            self.interrupt_grace,
            collect(&mut lease, msg_id, &mut discarded),
        )
        .await;
        match settled {
            Ok(Outcome::Completed) => {
                tracing::debug!(msg_id = %msg_id, "Interrupted cell acknowledged");
            }
            Ok(Outcome::Died) => {
                let status = lease.discard().await;
                tracing::warn!(
                    msg_id = %msg_id,
                    status = %describe_status(status),
                    "Kernel died after interrupt"
                );
            }
            Err(_) => {
                tracing::warn!(msg_id = %msg_id, "Kernel still busy after interrupt");
            }
        }
    }
}

/// Feed events for `msg_id` into `collector` until the cell completes or
/// the kernel dies. Events from other cells are dropped.
async fn collect(kernel: &mut Kernel, msg_id: &str, collector: &mut OutputCollector) -> Outcome {
    while let Some(event) = kernel.recv().await {
        if event.parent() != Some(msg_id) {
            tracing::trace!(msg_id = %msg_id, parent = ?event.parent(), "Dropping event for another cell");
            continue;
        }
        let done = event.is_completion();
        collector.push(&event);
        if done {
            return Outcome::Completed;
        }
    }
    Outcome::Died
}

async fn backend_died(lease: SessionLease<'_>, collector: OutputCollector) -> ExecutionResult {
    let pid = lease.pid();
    let status = describe_status(lease.discard().await);
    tracing::warn!(pid = pid, status = %status, "Kernel died during cell execution");
    collector.finish_with_failure(format!(
        "Kernel died unexpectedly during cell execution ({})",
        status
    ))
}
