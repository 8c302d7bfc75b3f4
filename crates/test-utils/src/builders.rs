#![allow(dead_code)]

use std::path::PathBuf;

use cronvisor::job::{Job, JobDescriptor, JobLimits, ScheduleMode};

/// Builder for `JobDescriptor` to simplify test setup.
pub struct JobDescriptorBuilder {
    desc: JobDescriptor,
}

impl JobDescriptorBuilder {
    /// Periodic job running `path` every second.
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            desc: JobDescriptor::new(name, path, ScheduleMode::Periodic, 1),
        }
    }

    /// Job whose path is `/bin/<name>`; handy when the path is irrelevant.
    pub fn named(name: &str) -> Self {
        Self::new(name, format!("/bin/{name}"))
    }

    pub fn periodic(mut self, secs: u64) -> Self {
        self.desc.mode = ScheduleMode::Periodic;
        self.desc.period = secs;
        self
    }

    pub fn wait_for_exit(mut self, secs: u64) -> Self {
        self.desc.mode = ScheduleMode::WaitForExit;
        self.desc.period = secs;
        self
    }

    pub fn mode(mut self, mode: ScheduleMode) -> Self {
        self.desc.mode = mode;
        self
    }

    pub fn period(mut self, secs: u64) -> Self {
        self.desc.period = secs;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.desc.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.desc.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.desc.cwd = Some(cwd.into());
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.desc.prefix = Some(prefix.to_string());
        self
    }

    pub fn kill(mut self, on: bool) -> Self {
        self.desc.kill = on;
        self
    }

    pub fn reconfig(mut self, on: bool) -> Self {
        self.desc.reconfig = on;
        self
    }

    pub fn build(self) -> JobDescriptor {
        self.desc
    }

    /// Build an uninitialized `Job` with default limits.
    ///
    /// Panics if the schedule is invalid; use `build()` with
    /// `Job::from_descriptor` to test rejections.
    pub fn build_job(self) -> Job {
        Job::from_descriptor(&self.desc, JobLimits::default())
            .expect("builder produced an invalid job")
    }
}
