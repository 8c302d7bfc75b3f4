// src/engine/mod.rs

//! Supervisor engine.
//!
//! This module ties the job registry to the host:
//! - the pure core ([`core`]) applies one [`RuntimeEvent`] at a time to the
//!   registry and tells the shell what else to do
//! - the async shell ([`runtime`]) owns the event channel, the reactor and
//!   the output sink, and drives the core until shutdown completes
//!
//! Events come from the reactor (timers, pipes, exits) and from the
//! outside world through a [`RuntimeHandle`] (reload, SIGHUP broadcast,
//! shutdown).

use std::time::Duration;

use crate::host::{ExitStatus, PipeId, TimerId};
use crate::job::{JobDescriptor, JobLimits};

pub mod core;
pub mod runtime;

pub use self::core::{CoreCommand, CoreStep, CoreSupervisor};
pub use runtime::{Runtime, RuntimeHandle};

/// Capacity of the runtime event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events flowing into the runtime.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A job timer expired.
    TimerFired { job: String, timer: TimerId },
    /// A child pipe has bytes (or EOF) waiting.
    PipeReadable { job: String, pipe: PipeId },
    /// A child exited and its pipes were given a chance to drain.
    ProcessExited {
        job: String,
        pid: u32,
        status: ExitStatus,
    },
    /// Reconcile the registry against a new job list.
    Reload(Vec<JobDescriptor>),
    /// Broadcast SIGHUP to jobs that accept it.
    Reconfig,
    /// Stop supervising. `force` SIGKILLs everything at once.
    Shutdown { force: bool },
}

/// Supervisor-wide settings (the `[supervisor]` config table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub kill_grace: Duration,
    /// How long a graceful shutdown may take before everything is SIGKILLed.
    pub shutdown_timeout: Duration,
    pub max_reads_per_event: usize,
    pub read_chunk_size: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        let limits = JobLimits::default();
        Self {
            kill_grace: limits.kill_grace,
            shutdown_timeout: Duration::from_secs(5),
            max_reads_per_event: limits.max_reads_per_event,
            read_chunk_size: limits.read_chunk_size,
        }
    }
}

impl SupervisorOptions {
    /// Per-job limits derived from these options.
    pub fn job_limits(&self) -> JobLimits {
        JobLimits {
            kill_grace: self.kill_grace,
            max_reads_per_event: self.max_reads_per_event,
            read_chunk_size: self.read_chunk_size,
            ..JobLimits::default()
        }
    }
}
