// src/job/descriptor.rs

use std::path::PathBuf;

use super::state::ScheduleMode;

/// Already-parsed description of one job, as produced by the configuration
/// layer. The registry turns these into [`super::Job`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Unique job name; also passed to the child as argv[0].
    pub name: String,
    /// Executable to run.
    pub path: PathBuf,
    /// Prepended to every stdout record the job produces.
    pub prefix: Option<String>,
    /// Arguments after argv[0].
    pub args: Vec<String>,
    /// Environment overrides.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub mode: ScheduleMode,
    /// Period in seconds.
    pub period: u64,
    /// Kill a still-running instance when a new run is requested.
    pub kill: bool,
    /// Send SIGHUP on reconfiguration instead of leaving the job alone.
    pub reconfig: bool,
}

impl JobDescriptor {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        mode: ScheduleMode,
        period: u64,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            prefix: None,
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            mode,
            period,
            kill: false,
            reconfig: false,
        }
    }
}
