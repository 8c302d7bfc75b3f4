// src/job/state.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created but `initialize()` has not been called yet.
    Uninitialized,
    /// No process running; waiting for the next scheduled start.
    Idle,
    /// A process is running.
    Running,
    /// SIGTERM sent; waiting for exit or the kill grace period.
    TermSent,
    /// SIGKILL sent; waiting for the exit notification.
    KillSent,
    /// Decommissioned (mode `Kill`) and the process is gone.
    Dead,
}

impl JobState {
    /// True while a child process exists for this job.
    pub fn has_process(&self) -> bool {
        matches!(
            self,
            JobState::Running | JobState::TermSent | JobState::KillSent
        )
    }

    /// True while a kill sequence is in progress.
    pub fn is_killing(&self) -> bool {
        matches!(self, JobState::TermSent | JobState::KillSent)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Uninitialized => "uninitialized",
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::TermSent => "term-sent",
            JobState::KillSent => "kill-sent",
            JobState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// How a job is scheduled.
///
/// - `WaitForExit`: the next run starts `period` seconds after the previous
///   one exited (immediately when `period` is 0).
/// - `Periodic`: a run is requested every `period` seconds, whether or not
///   the previous one finished.
/// - `Kill`: the job is being decommissioned; it is terminated and never
///   scheduled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    WaitForExit,
    Periodic,
    Kill,
}

impl Default for ScheduleMode {
    fn default() -> Self {
        ScheduleMode::Periodic
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleMode::WaitForExit => "wait_for_exit",
            ScheduleMode::Periodic => "periodic",
            ScheduleMode::Kill => "kill",
        };
        f.write_str(s)
    }
}

impl FromStr for ScheduleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "wait_for_exit" | "waitforexit" => Ok(ScheduleMode::WaitForExit),
            "periodic" => Ok(ScheduleMode::Periodic),
            "kill" => Ok(ScheduleMode::Kill),
            other => Err(format!(
                "invalid schedule mode: {other} (expected \"wait_for_exit\", \"periodic\" or \"kill\")"
            )),
        }
    }
}
