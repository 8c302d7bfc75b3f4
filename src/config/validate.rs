// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, DurationValue, JobConfig, RawConfigFile, SupervisorSection};
use crate::engine::SupervisorOptions;
use crate::errors::{CronvisorError, Result};
use crate::job::{JobDescriptor, ScheduleMode};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CronvisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_jobs(&raw)?;
        let supervisor = validate_supervisor(&raw.supervisor)?;
        let jobs = raw
            .job
            .into_iter()
            .map(|(name, job)| validate_job(name, job))
            .collect::<Result<Vec<_>>>()?;
        Ok(ConfigFile::new_unchecked(supervisor, jobs))
    }
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(CronvisorError::ConfigError(
            "config must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_supervisor(section: &SupervisorSection) -> Result<SupervisorOptions> {
    if section.max_reads_per_event == 0 {
        return Err(CronvisorError::ConfigError(
            "[supervisor].max_reads_per_event must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.read_chunk_size == 0 {
        return Err(CronvisorError::ConfigError(
            "[supervisor].read_chunk_size must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(SupervisorOptions {
        kill_grace: to_duration(&section.kill_grace, "[supervisor].kill_grace")?,
        shutdown_timeout: to_duration(&section.shutdown_timeout, "[supervisor].shutdown_timeout")?,
        max_reads_per_event: section.max_reads_per_event,
        read_chunk_size: section.read_chunk_size,
    })
}

fn validate_job(name: String, job: JobConfig) -> Result<JobDescriptor> {
    if name.trim().is_empty() {
        return Err(CronvisorError::ConfigError(
            "job names must not be empty".to_string(),
        ));
    }
    if job.path.as_os_str().is_empty() {
        return Err(CronvisorError::ConfigError(format!(
            "job '{name}' has an empty `path`"
        )));
    }

    let period = match &job.period {
        Some(value) => whole_seconds(value, &format!("job '{name}' `period`"))?,
        None => 0,
    };
    if job.mode == ScheduleMode::Periodic && period == 0 {
        return Err(CronvisorError::ConfigError(format!(
            "job '{name}' is periodic and needs a non-zero `period`"
        )));
    }

    let mut desc = JobDescriptor::new(name, job.path, job.mode, period);
    desc.args = job.args;
    desc.env = job.env.into_iter().collect();
    desc.cwd = job.cwd;
    desc.prefix = job.prefix;
    desc.kill = job.kill;
    desc.reconfig = job.reconfig;
    Ok(desc)
}

fn to_duration(value: &DurationValue, what: &str) -> Result<Duration> {
    match value {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
        DurationValue::Text(text) => parse_duration(text).map_err(|reason| {
            CronvisorError::ConfigError(format!("{what}: invalid duration '{text}': {reason}"))
        }),
    }
}

fn whole_seconds(value: &DurationValue, what: &str) -> Result<u64> {
    let duration = to_duration(value, what)?;
    if duration.subsec_nanos() != 0 {
        return Err(CronvisorError::ConfigError(format!(
            "{what} must be a whole number of seconds (got {duration:?})"
        )));
    }
    Ok(duration.as_secs())
}

/// Parse `"250ms"`, `"30s"`, `"5m"`, `"2h"` or a bare number of seconds.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);

    if digits.is_empty() {
        return Err("expected a number".to_string());
    }
    let n: u64 = digits.parse().map_err(|e| format!("{e}"))?;

    let secs = |mult: u64| {
        n.checked_mul(mult)
            .map(Duration::from_secs)
            .ok_or_else(|| "value too large".to_string())
    };

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => secs(1),
        "m" => secs(60),
        "h" => secs(3600),
        other => Err(format!("unknown unit '{other}' (use ms, s, m or h)")),
    }
}
