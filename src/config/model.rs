// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::SupervisorOptions;
use crate::job::{JobDescriptor, ScheduleMode};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [supervisor]
/// kill_grace = "2s"
/// shutdown_timeout = "10s"
///
/// [job.uptime]
/// path = "/usr/bin/uptime"
/// period = "1m"
/// prefix = "uptime "
///
/// [job.collector]
/// path = "/usr/local/bin/collector"
/// args = ["--once"]
/// mode = "wait_for_exit"
/// period = 0
/// reconfig = true
/// ```
///
/// Use [`ConfigFile::try_from`] (or `loader::load_and_validate`) to get a
/// checked [`ConfigFile`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// All jobs from `[job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// A duration written either as a bare number of seconds or as a string
/// with a unit suffix (`"250ms"`, `"30s"`, `"5m"`, `"1h"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl From<&str> for DurationValue {
    fn from(s: &str) -> Self {
        DurationValue::Text(s.to_string())
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSection {
    /// Grace period between SIGTERM and SIGKILL.
    #[serde(default = "default_kill_grace")]
    pub kill_grace: DurationValue,

    /// How long a graceful shutdown may take.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: DurationValue,

    #[serde(default = "default_max_reads_per_event")]
    pub max_reads_per_event: usize,

    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_kill_grace() -> DurationValue {
    "1s".into()
}

fn default_shutdown_timeout() -> DurationValue {
    "5s".into()
}

fn default_max_reads_per_event() -> usize {
    10
}

fn default_read_chunk_size() -> usize {
    4096
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            kill_grace: default_kill_grace(),
            shutdown_timeout: default_shutdown_timeout(),
            max_reads_per_event: default_max_reads_per_event(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Executable to run. Relative paths are resolved by the OS at spawn
    /// time (against `PATH` for bare names).
    pub path: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Prepended to every stdout record.
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub mode: ScheduleMode,

    /// Seconds between runs (periodic) or between exit and restart
    /// (wait_for_exit). Must be whole seconds.
    #[serde(default)]
    pub period: Option<DurationValue>,

    /// Kill a still-running instance when the next run is due.
    #[serde(default)]
    pub kill: bool,

    /// Forward SIGHUP when the supervisor is reconfigured.
    #[serde(default)]
    pub reconfig: bool,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub supervisor: SupervisorOptions,
    /// One descriptor per job, sorted by name.
    pub jobs: Vec<JobDescriptor>,
}

impl ConfigFile {
    /// Construct without validation. Prefer `ConfigFile::try_from`.
    pub fn new_unchecked(supervisor: SupervisorOptions, jobs: Vec<JobDescriptor>) -> Self {
        Self { supervisor, jobs }
    }

    pub fn job(&self, name: &str) -> Option<&JobDescriptor> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
