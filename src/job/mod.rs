// src/job/mod.rs

//! Per-job state machine.
//!
//! A [`Job`] owns everything about one supervised process: its schedule,
//! timers, pipes, lifecycle state and output buffers. It never blocks and
//! never talks to the OS directly; every side effect goes through the
//! [`Reactor`] in the [`JobContext`] passed to each operation, and every
//! harvested record goes to the context's [`JobSink`].
//!
//! - [`state`] defines lifecycle states and schedule modes.
//! - [`descriptor`] is the parsed job description the registry consumes.
//! - [`core`] holds the `Job` type, setters, scheduling and timer dispatch.
//! - [`lifecycle`] starts, kills, reaps and HUPs the child.
//! - [`io`] pumps pipes and drains completed output blocks.

use std::time::Duration;

use thiserror::Error;

use crate::host::{HostError, Reactor};
use crate::sink::JobSink;

pub mod core;
pub mod descriptor;
pub mod io;
pub mod lifecycle;
pub mod state;

pub use self::core::Job;
pub use descriptor::JobDescriptor;
pub use state::{JobState, ScheduleMode};

/// Collaborators a job needs for one operation.
pub struct JobContext<'a> {
    pub reactor: &'a mut dyn Reactor,
    pub sink: &'a mut dyn JobSink,
}

impl<'a> JobContext<'a> {
    pub fn new(reactor: &'a mut dyn Reactor, sink: &'a mut dyn JobSink) -> Self {
        Self { reactor, sink }
    }
}

/// Tunables shared by every job of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLimits {
    /// Time between SIGTERM and the SIGKILL escalation.
    pub kill_grace: Duration,
    /// Maximum reads per readable event, so one chatty job cannot starve
    /// the event loop.
    pub max_reads_per_event: usize,
    /// Size of a single pipe read.
    pub read_chunk_size: usize,
    /// Maximum reads per pipe when draining after the process exited.
    pub max_drain_reads: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(1),
            max_reads_per_event: 10,
            read_chunk_size: 4096,
            max_drain_reads: 1024,
        }
    }
}

/// What `run_job` / `start_job` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new process was started.
    Started,
    /// The previous instance is being killed; a new one starts after reap.
    Busy,
    /// Nothing was done (still running without `kill`, or decommissioned).
    Skipped,
}

/// What `kill_job` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// No process to kill.
    NotRunning,
    /// SIGTERM sent and the escalation timer armed.
    TermSent,
    /// SIGKILL sent.
    KillSent,
}

/// What `reconfig` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigOutcome {
    Signaled,
    /// The job does not accept SIGHUP.
    Disabled,
    NotRunning,
    /// The job has not produced a complete output block yet.
    AwaitingFirstBlock,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job '{job}': invalid schedule: {reason}")]
    InvalidSchedule { job: String, reason: String },

    #[error("job '{0}' is already initialized")]
    AlreadyInitialized(String),

    #[error("job '{job}' is not idle (state {state})")]
    NotIdle { job: String, state: JobState },

    #[error("job '{job}': nothing to kill (state {state})")]
    NothingToKill { job: String, state: JobState },

    #[error("job '{job}': {source}")]
    Host {
        job: String,
        #[source]
        source: HostError,
    },
}
