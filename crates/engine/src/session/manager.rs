//! Session manager owning one notebook's backend.
//!
//! The manager holds at most one [`Kernel`]. Access to it goes through a
//! FIFO [`tokio::sync::Mutex`], so cells submitted to the same notebook run
//! strictly in submission order. Lifecycle bookkeeping (state, pid, the
//! kill handle) lives in a separate short-lived lock so it can be read or
//! acted on while a cell holds the kernel.

use std::ops::{Deref, DerefMut};
use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::MutexGuard as AsyncMutexGuard;
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex};

use super::kernel::{describe_status, Kernel, KillHandle, StartupFailure};
use super::state::SessionState;
use crate::config::KernelConfig;

/// Lifecycle bookkeeping readable without waiting for a running cell.
#[derive(Debug, Default)]
struct Shared {
    state: SessionState,
    pid: Option<u32>,
    execution_count: Option<u32>,
    kill: Option<KillHandle>,
}

/// Owns the lifecycle of one interpreter session.
pub struct SessionManager {
    config: KernelConfig,
    kernel: AsyncMutex<Option<Kernel>>,
    shared: Mutex<Shared>,
}

impl SessionManager {
    /// Creates a manager. No process is started until first use.
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            kernel: AsyncMutex::new(None),
            shared: Mutex::new(Shared::default()),
        }
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the current lifecycle state.
    ///
    /// A backend that died while idle is reported as terminated.
    pub fn state(&self) -> SessionState {
        let shared = self.shared();
        match (&shared.kill, shared.state) {
            (Some(kill), state) if state.is_live() && kill.is_dead() => SessionState::Terminated,
            (_, state) => state,
        }
    }

    /// Returns true if a live backend is attached.
    pub fn has_session(&self) -> bool {
        self.state().is_live()
    }

    /// Returns the pid of the live backend, if any.
    pub fn pid(&self) -> Option<u32> {
        if self.has_session() {
            self.shared().pid
        } else {
            None
        }
    }

    /// Returns the execution counter of the last completed cell on the
    /// current backend.
    pub fn execution_count(&self) -> Option<u32> {
        self.shared().execution_count
    }

    fn set_state(&self, state: SessionState) {
        let mut shared = self.shared();
        if shared.state != state {
            tracing::trace!(from = %shared.state, to = %state, "Session state change");
            shared.state = state;
        }
    }

    /// Make sure a live backend exists and take exclusive use of it.
    ///
    /// Waits behind earlier callers. A dead backend is reaped and replaced.
    /// On failure the prior state is restored and no process is left behind.
    pub async fn lease(&self) -> Result<SessionLease<'_>, StartupFailure> {
        let mut slot = self.kernel.lock().await;

        let kernel = match slot.take() {
            Some(kernel) if !kernel.is_dead() => kernel,
            stale => {
                if let Some(mut dead) = stale {
                    let status = dead.shutdown(std::time::Duration::ZERO).await;
                    tracing::warn!(
                        pid = dead.pid(),
                        status = %describe_status(status),
                        "Kernel died while idle, replacing it"
                    );
                    self.clear(SessionState::Terminated);
                }
                self.start().await?
            }
        };

        let kernel = AsyncMutexGuard::map(slot, |slot| slot.insert(kernel));
        Ok(SessionLease {
            kernel,
            manager: self,
        })
    }

    /// Ensure a live backend exists without running anything.
    pub async fn ensure(&self) -> Result<(), StartupFailure> {
        self.lease().await.map(|_| ())
    }

    async fn start(&self) -> Result<Kernel, StartupFailure> {
        let prior = {
            let mut shared = self.shared();
            let prior = shared.state;
            shared.state = SessionState::Starting;
            prior
        };
        // Also covers the caller dropping this future mid-start.
        let mut restore = RestoreState {
            manager: self,
            prior: Some(prior),
        };

        let kernel = Kernel::start(&self.config).await?;
        restore.prior = None;

        let mut shared = self.shared();
        shared.state = SessionState::Ready;
        shared.pid = Some(kernel.pid());
        shared.execution_count = None;
        shared.kill = Some(kernel.kill_handle());
        Ok(kernel)
    }

    fn clear(&self, state: SessionState) {
        let mut shared = self.shared();
        shared.state = state;
        shared.pid = None;
        shared.execution_count = None;
        shared.kill = None;
    }

    /// Stop the backend and release everything it holds.
    ///
    /// Safe to call in any state and more than once. A cell that is still
    /// running is killed rather than waited for.
    pub async fn terminate(&self) {
        let running = {
            let shared = self.shared();
            if shared.state == SessionState::Executing {
                shared.kill.clone()
            } else {
                None
            }
        };
        if let Some(kill) = running {
            tracing::info!(pgid = kill.pgid(), "Killing kernel with a cell in flight");
            kill.kill();
        }

        let mut slot = self.kernel.lock().await;
        if let Some(mut kernel) = slot.take() {
            let pid = kernel.pid();
            let status = kernel.shutdown(self.config.shutdown_grace()).await;
            tracing::info!(pid = pid, status = %describe_status(status), "Session terminated");
        }
        self.clear(SessionState::Terminated);
    }

    /// Terminate and forget the session; the next use starts a fresh one.
    pub async fn reset(&self) {
        self.terminate().await;
        tracing::debug!("Session reset");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Kernel::drop kills the process group if it was never shut down.
        if let Some(kill) = self.shared().kill.take() {
            kill.kill();
        }
    }
}

/// Puts back the pre-start state unless disarmed.
struct RestoreState<'a> {
    manager: &'a SessionManager,
    prior: Option<SessionState>,
}

impl Drop for RestoreState<'_> {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            self.manager.set_state(prior);
        }
    }
}

/// Exclusive use of a live backend for the duration of one cell.
///
/// Dereferences to the [`Kernel`]. When dropped the session goes back to
/// `Ready`, or to `Terminated` if the backend died meanwhile.
pub struct SessionLease<'a> {
    kernel: MappedMutexGuard<'a, Kernel>,
    manager: &'a SessionManager,
}

impl SessionLease<'_> {
    /// Mark the session as running a cell.
    pub fn begin_execution(&self) {
        self.manager.set_state(SessionState::Executing);
    }

    /// Record the execution counter reported by the backend.
    pub fn record_execution(&self, count: u32) {
        self.manager.shared().execution_count = Some(count);
    }

    /// Reap a backend that died and mark the session terminated.
    pub async fn discard(mut self) -> Option<ExitStatus> {
        let status = self.kernel.shutdown(std::time::Duration::ZERO).await;
        self.manager.clear(SessionState::Terminated);
        status
    }
}

impl Deref for SessionLease<'_> {
    type Target = Kernel;

    fn deref(&self) -> &Kernel {
        &self.kernel
    }
}

impl DerefMut for SessionLease<'_> {
    fn deref_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if self.kernel.is_dead() {
            let mut shared = self.manager.shared();
            if shared.state.is_live() {
                shared.state = SessionState::Terminated;
            }
        } else {
            self.manager.set_state(SessionState::Ready);
        }
    }
}
