// src/host/mod.rs

//! Host reactor abstraction.
//!
//! Jobs never touch timers, pipes, or processes directly. They talk to a
//! [`Reactor`], which the embedding daemon provides:
//!
//! - [`TokioReactor`] is the production implementation (tokio timers,
//!   `tokio::process`, `nix` signals). It reports timer ticks, readable
//!   pipes, and process exits as [`crate::engine::RuntimeEvent`]s.
//! - Tests provide a fake implementation that records every call.
//!
//! Every callback the host delivers carries the job name it was registered
//! for, so events are routed back through
//! [`crate::registry::JobRegistry`].

use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub mod tokio_reactor;

pub use tokio_reactor::TokioReactor;

/// Handle of a timer registered with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Handle of the read end of a child pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub u64);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{}", self.0)
    }
}

/// Signals the supervisor sends to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Polite termination request (SIGTERM).
    Term,
    /// Hard kill (SIGKILL).
    Kill,
    /// Reload settings (SIGHUP).
    Hup,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {code}"),
            ExitStatus::Signaled(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// Result of one non-blocking pipe read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeRead {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// Writer side closed and everything was read.
    Eof,
    Error(String),
}

/// Everything the host needs to start a child.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    /// Job name; used as argv[0] and to route the exit notification back.
    pub job: &'a str,
    pub path: &'a Path,
    pub args: &'a [String],
    pub env: &'a [(String, String)],
    pub cwd: Option<&'a Path>,
}

/// A freshly started child and the read ends of its output pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: u32,
    pub stdout: PipeId,
    pub stderr: PipeId,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("failed to spawn '{path}': {reason}")]
    Spawn { path: String, reason: String },

    #[error("failed to create pipes: {0}")]
    Pipe(String),

    #[error("failed to send {signal:?} to pid {pid}: {reason}")]
    Signal {
        pid: u32,
        signal: SignalKind,
        reason: String,
    },

    #[error("timer error: {0}")]
    Timer(String),

    #[error("unknown {0}")]
    UnknownPipe(PipeId),

    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

/// Services the embedding event loop provides to jobs.
///
/// All methods are non-blocking. Timer ticks, readable pipes and process
/// exits come back later as events addressed to the job name given at
/// registration.
pub trait Reactor {
    /// Arm a timer that first fires after `first` and then every `period`
    /// (one-shot when `period` is `None`).
    fn register_timer(
        &mut self,
        job: &str,
        first: Duration,
        period: Option<Duration>,
    ) -> Result<TimerId, HostError>;

    /// Re-arm an existing timer with new timing.
    fn reset_timer(
        &mut self,
        id: TimerId,
        first: Duration,
        period: Option<Duration>,
    ) -> Result<(), HostError>;

    /// Cancel a timer. Unknown ids are ignored.
    fn cancel_timer(&mut self, id: TimerId);

    /// Start a child with piped stdout/stderr and no stdin.
    fn create_process(&mut self, request: &SpawnRequest<'_>) -> Result<SpawnedProcess, HostError>;

    /// Start delivering readability events for `pipe` to `job`.
    fn register_pipe(&mut self, job: &str, pipe: PipeId) -> Result<(), HostError>;

    /// Copy up to `buf.len()` available bytes without blocking.
    fn read_pipe(&mut self, pipe: PipeId, buf: &mut [u8]) -> PipeRead;

    /// Stop watching `pipe` and release it.
    fn close_pipe(&mut self, pipe: PipeId);

    fn send_signal(&mut self, pid: u32, signal: SignalKind) -> Result<(), HostError>;

    /// Called by the event loop before a timer event is dispatched.
    /// Returning `false` drops the event (the timer is gone).
    fn acknowledge_timer(&mut self, _id: TimerId) -> bool {
        true
    }

    /// Called by the event loop after a readable event was dispatched.
    fn pipe_dispatched(&mut self, _pipe: PipeId) {}
}
