//! Backend interpreter process.
//!
//! A [`Kernel`] is one interpreter child running the embedded driver. The
//! child is the leader of its own process group so that anything the user
//! code spawns can be signalled and reaped together with it.
//!
//! Two reader tasks run per kernel: one decodes protocol events from
//! stdout into a channel, the other logs stderr (which also carries the
//! output of subprocesses started by user code) and keeps its tail for
//! startup diagnostics. When stdout closes the kernel's [`KillHandle`] is
//! cancelled, which is how a crash mid-cell is noticed.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use protocol::{driver_args, Event, LineCodec, ProtocolError, Request, PROTOCOL_VERSION};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, KernelConfig};

/// Capacity of the event channel between the stdout reader and the host.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Number of stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for reader tasks after the child is gone.
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors that prevent a session from being started.
///
/// This is the only error kind escalated out of a cell run.
#[derive(Error, Debug)]
pub enum StartupFailure {
    /// The interpreter could not be located or the configuration is unusable.
    #[error("invalid kernel configuration: {0}")]
    Config(#[from] ConfigError),

    /// The interpreter process could not be spawned.
    #[error("failed to spawn kernel {program}: {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The interpreter did not announce readiness in time.
    #[error("kernel did not become ready within {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The interpreter exited before announcing readiness.
    #[error("kernel exited during startup ({status}){}", format_stderr(.stderr))]
    Exited {
        /// Exit status description.
        status: String,
        /// Last lines the interpreter wrote to stderr.
        stderr: String,
    },

    /// The driver speaks another protocol version.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The first message was not a readiness announcement.
    #[error("unexpected message during startup: {0}")]
    UnexpectedMessage(String),
}

fn format_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Errors while submitting a request to a live kernel.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] ProtocolError),

    /// The kernel's stdin is closed.
    #[error("failed to write to kernel: {0}")]
    Io(#[from] std::io::Error),
}

/// Signals a kernel's process group without holding the kernel itself.
///
/// Held outside the session lock so a cell that never finishes can still be
/// interrupted or killed.
#[derive(Debug, Clone)]
pub struct KillHandle {
    pgid: Pid,
    token: CancellationToken,
}

impl KillHandle {
    fn new(pid: u32, token: CancellationToken) -> Self {
        Self {
            pgid: Pid::from_raw(pid as i32),
            token,
        }
    }

    /// Process group id (equal to the interpreter pid).
    pub fn pgid(&self) -> i32 {
        self.pgid.as_raw()
    }

    /// Send SIGINT to the process group. Returns false if nothing received it.
    pub fn interrupt(&self) -> bool {
        self.signal(Signal::SIGINT)
    }

    /// SIGKILL the whole process group and mark the kernel dead.
    pub fn kill(&self) {
        self.signal(Signal::SIGKILL);
        self.token.cancel();
    }

    /// Returns true once the kernel's stdout has closed or it was killed.
    pub fn is_dead(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when the kernel dies.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn signal(&self, signal: Signal) -> bool {
        match killpg(self.pgid, signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                tracing::warn!(pgid = self.pgid.as_raw(), signal = ?signal, error = %e, "Failed to signal kernel");
                false
            }
        }
    }
}

/// A running interpreter process speaking the driver protocol.
pub struct Kernel {
    child: Child,
    stdin: ChildStdin,
    events: mpsc::Receiver<Event>,
    codec: LineCodec,
    pid: u32,
    language_version: String,
    kill: KillHandle,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    readers: Vec<JoinHandle<()>>,
    reaped: bool,
}

impl Kernel {
    /// Spawn an interpreter and wait until its driver reports ready.
    ///
    /// On failure nothing is left running.
    pub async fn start(config: &KernelConfig) -> Result<Self, StartupFailure> {
        let program = config.resolve_program()?;
        let started = Instant::now();

        let mut cmd = Command::new(&program);
        cmd.args(&config.args)
            .args(driver_args())
            .env("MPLBACKEND", "Agg")
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| StartupFailure::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        let (pid, stdin, stdout, stderr) = match (
            child.id(),
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(pid), Some(stdin), Some(stdout), Some(stderr)) => (pid, stdin, stdout, stderr),
            _ => {
                let status = reap(&mut child).await;
                return Err(StartupFailure::Exited {
                    status,
                    stderr: String::new(),
                });
            }
        };

        let token = CancellationToken::new();
        let codec = LineCodec::new();
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        let readers = vec![
            spawn_event_reader(pid, stdout, codec.clone(), tx, token.clone()),
            spawn_stderr_reader(pid, stderr, Arc::clone(&stderr_tail)),
        ];

        let mut kernel = Kernel {
            child,
            stdin,
            events,
            codec,
            pid,
            language_version: String::new(),
            kill: KillHandle::new(pid, token),
            stderr_tail,
            readers,
            reaped: false,
        };

        tracing::debug!(pid = pid, program = %program.display(), "Spawned kernel");

        match kernel.wait_ready(config.startup_timeout()).await {
            Ok(()) => {
                tracing::info!(
                    pid = pid,
                    language_version = %kernel.language_version,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Kernel ready"
                );
                Ok(kernel)
            }
            Err(StartupFailure::Exited { .. }) => {
                let status = kernel.shutdown(Duration::ZERO).await;
                let err = StartupFailure::Exited {
                    status: describe_status(status),
                    stderr: kernel.stderr_tail(),
                };
                tracing::warn!(pid = pid, error = %err, "Kernel failed to start");
                Err(err)
            }
            Err(err) => {
                kernel.shutdown(Duration::ZERO).await;
                tracing::warn!(pid = pid, error = %err, "Kernel failed to start");
                Err(err)
            }
        }
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), StartupFailure> {
        match tokio::time::timeout(timeout, self.events.recv()).await {
            Err(_) => Err(StartupFailure::Timeout(timeout)),
            Ok(None) => Err(StartupFailure::Exited {
                status: String::new(),
                stderr: String::new(),
            }),
            Ok(Some(Event::Ready(ready))) => {
                if ready.protocol_version != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        got: ready.protocol_version,
                    }
                    .into());
                }
                if ready.pid != self.pid {
                    tracing::debug!(pid = self.pid, reported = ready.pid, "Driver reports a different pid");
                }
                self.language_version = ready.language_version;
                Ok(())
            }
            Ok(Some(other)) => Err(StartupFailure::UnexpectedMessage(format!("{:?}", other))),
        }
    }

    /// Returns the interpreter process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the interpreter version reported at startup.
    pub fn language_version(&self) -> &str {
        &self.language_version
    }

    /// Returns a handle for signalling this kernel from outside the lock.
    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Returns true if the kernel's output channel closed or it was killed.
    pub fn is_dead(&self) -> bool {
        self.kill.is_dead()
    }

    /// Write one request line to the driver.
    pub async fn send(&mut self, request: &Request) -> Result<(), SubmitError> {
        let line = self.codec.encode(request)?;
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Receive the next event. Returns `None` once the kernel is dead.
    pub async fn recv(&mut self) -> Option<Event> {
        let token = self.kill.token.clone();
        tokio::select! {
            biased;
            event = self.events.recv() => event,
            _ = token.cancelled() => None,
        }
    }

    /// Discard events already buffered from an earlier cell.
    pub fn drain_stale(&mut self) -> usize {
        let mut drained = 0;
        while self.events.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Returns the last lines the interpreter wrote to stderr.
    pub fn stderr_tail(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Stop the kernel and release everything it holds.
    ///
    /// Asks the driver to exit, waits up to `grace`, then kills the whole
    /// process group and reaps the child. Safe to call more than once.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<ExitStatus> {
        if self.reaped {
            return self.child.try_wait().ok().flatten();
        }

        if !self.is_dead() && !grace.is_zero() && self.send(&Request::Shutdown).await.is_ok() {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(pid = self.pid, status = %status, "Kernel exited on request");
                }
                Ok(Err(e)) => {
                    tracing::debug!(pid = self.pid, error = %e, "Failed to wait for kernel");
                }
                Err(_) => {
                    tracing::debug!(pid = self.pid, "Kernel ignored shutdown request");
                }
            }
        }

        // Grandchildren share the group even after the leader exits.
        self.kill.kill();
        let status = self.child.wait().await.ok();
        self.reaped = true;

        // Unblock the stdout reader if it is waiting on a full channel.
        self.events.close();
        for mut reader in self.readers.drain(..) {
            if tokio::time::timeout(READER_JOIN_TIMEOUT, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        tracing::debug!(pid = self.pid, status = %describe_status(status), "Kernel reaped");
        status
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if !self.reaped {
            tracing::debug!(pid = self.pid, "Kernel dropped without shutdown, killing process group");
            self.kill.kill();
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Human-readable exit status.
pub fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown exit status".to_string(),
    }
}

async fn reap(child: &mut Child) -> String {
    let _ = child.start_kill();
    describe_status(child.wait().await.ok())
}

/// Outcome of reading one protocol line.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// The line exceeded the limit and was skipped without buffering it.
    TooLong,
}

/// Read one line into `line`, buffering at most `limit` bytes of it.
async fn read_line<R>(reader: &mut R, limit: usize, line: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader).take(limit as u64).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if line.last() == Some(&b'\n') || read < limit {
        return Ok(LineRead::Line);
    }

    line.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                break;
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
    Ok(LineRead::TooLong)
}

fn spawn_event_reader(
    pid: u32,
    stdout: tokio::process::ChildStdout,
    codec: LineCodec,
    tx: mpsc::Sender<Event>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();

        loop {
            match read_line(&mut reader, codec.max_line_size(), &mut line).await {
                Ok(LineRead::Eof) => {
                    tracing::debug!(pid = pid, "Kernel stdout closed");
                    break;
                }
                Ok(LineRead::Line) => match codec.decode::<Event>(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(pid = pid, error = %e, "Dropping undecodable kernel message");
                    }
                },
                Ok(LineRead::TooLong) => {
                    tracing::warn!(
                        pid = pid,
                        max = codec.max_line_size(),
                        "Dropping oversized kernel message"
                    );
                }
                Err(e) => {
                    tracing::warn!(pid = pid, error = %e, "Error reading kernel stdout");
                    break;
                }
            }
        }

        token.cancel();
    })
}

fn spawn_stderr_reader(
    pid: u32,
    stderr: tokio::process::ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(pid = pid, line = %line, "kernel stderr");
                    let mut tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::trace!(pid = pid, error = %e, "Error reading kernel stderr");
                    break;
                }
            }
        }
    })
}
