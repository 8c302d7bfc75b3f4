// src/registry/mod.rs

//! Collection of named jobs.
//!
//! The registry owns every [`Job`], routes host events to them by name,
//! and implements the bulk operations the owning daemon needs: kill all,
//! SIGHUP broadcast, and mark-sweep reconciliation against a new job list
//! (see [`reconcile`]).

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::errors::{CronvisorError, Result};
use crate::host::{ExitStatus, PipeId, TimerId};
use crate::job::{Job, JobContext, JobLimits, ReconfigOutcome, ScheduleMode};

pub mod reconcile;

pub use reconcile::ReconcileReport;

/// Jobs keyed by unique name.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Job>,
    /// Limits handed to jobs created by [`JobRegistry::reconcile`].
    limits: JobLimits,
    /// Set by a graceful [`JobRegistry::kill_all`]; reaped jobs are dropped.
    draining: bool,
}

impl JobRegistry {
    pub fn new(limits: JobLimits) -> Self {
        Self {
            jobs: BTreeMap::new(),
            limits,
            draining: false,
        }
    }

    pub fn limits(&self) -> JobLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Insert a job. A job with the same name is never replaced: the
    /// existing one (and its running process) is kept and an error returned.
    pub fn add(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(job.name()) {
            warn!(job = %job.name(), "job already registered; keeping the existing one");
            return Err(CronvisorError::DuplicateJob(job.name().to_string()));
        }
        debug!(job = %job.name(), "job registered");
        self.jobs.insert(job.name().to_string(), job);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.get_mut(name)
    }

    /// Remove a job, SIGKILL its process and cancel its timers.
    pub fn remove(&mut self, name: &str, cx: &mut JobContext<'_>) -> bool {
        match self.jobs.remove(name) {
            Some(mut job) => {
                job.shutdown(cx);
                info!(job = %name, "job removed");
                true
            }
            None => {
                debug!(job = %name, "remove: no such job");
                false
            }
        }
    }

    /// Kill every job.
    ///
    /// With `force`, every child is SIGKILLed and every job destroyed right
    /// away. Without it, jobs are switched to `Kill` mode and sent SIGTERM;
    /// each one is destroyed once its process has been reaped, and the
    /// usual escalation to SIGKILL applies meanwhile.
    pub fn kill_all(&mut self, force: bool, cx: &mut JobContext<'_>) {
        info!(jobs = self.jobs.len(), force, "killing all jobs");

        if force {
            for (_, mut job) in std::mem::take(&mut self.jobs) {
                job.shutdown(cx);
            }
            return;
        }

        self.draining = true;
        for job in self.jobs.values_mut() {
            let period = job.period();
            if let Err(e) = job.set_schedule(ScheduleMode::Kill, period, cx) {
                warn!(job = %job.name(), error = %e, "failed to decommission job");
            }
        }
        self.sweep_dead(cx);
    }

    /// True when no job has a live process.
    pub fn shutdown_ok(&self) -> bool {
        self.jobs.values().all(|job| !job.state().has_process())
    }

    /// Forward a reconfiguration to every job (SIGHUP where enabled).
    /// Returns how many jobs were signalled.
    pub fn reconfig(&mut self, cx: &mut JobContext<'_>) -> usize {
        let mut signaled = 0;
        for job in self.jobs.values_mut() {
            match job.reconfig(cx) {
                Ok(ReconfigOutcome::Signaled) => signaled += 1,
                Ok(_) => {}
                Err(e) => warn!(job = %job.name(), error = %e, "reconfig failed"),
            }
        }
        signaled
    }

    pub fn clear_all_marks(&mut self) {
        for job in self.jobs.values_mut() {
            job.clear_mark();
        }
    }

    /// Mark a job as still present in the current job list.
    pub fn mark(&mut self, name: &str) -> bool {
        match self.jobs.get_mut(name) {
            Some(job) => {
                job.mark();
                true
            }
            None => false,
        }
    }

    /// Remove (and kill) every job not marked since the last
    /// [`JobRegistry::clear_all_marks`]. Returns the removed names.
    pub fn delete_unmarked(&mut self, cx: &mut JobContext<'_>) -> Vec<String> {
        let doomed: Vec<String> = self
            .jobs
            .values()
            .filter(|job| !job.is_marked())
            .map(|job| job.name().to_string())
            .collect();

        for name in &doomed {
            self.remove(name, cx);
        }
        doomed
    }

    /// Route a timer tick.
    pub fn on_timer(&mut self, name: &str, id: TimerId, cx: &mut JobContext<'_>) {
        match self.jobs.get_mut(name) {
            Some(job) => job.on_timer(id, cx),
            None => debug!(job = %name, timer = %id, "timer for unknown job"),
        }
    }

    /// Route a pipe readability event.
    pub fn on_pipe_readable(&mut self, name: &str, pipe: PipeId, cx: &mut JobContext<'_>) {
        match self.jobs.get_mut(name) {
            Some(job) => job.on_pipe_readable(pipe, cx),
            None => {
                debug!(job = %name, %pipe, "pipe event for unknown job; closing");
                cx.reactor.close_pipe(pipe);
            }
        }
    }

    /// Route a process exit. Decommissioned jobs are dropped once reaped.
    pub fn on_exit(&mut self, name: &str, pid: u32, status: ExitStatus, cx: &mut JobContext<'_>) {
        match self.jobs.get_mut(name) {
            Some(job) => job.reap(pid, status, cx),
            None => {
                debug!(job = %name, pid, %status, "exit of a job that is no longer registered");
                return;
            }
        }
        self.sweep_dead(cx);
    }

    /// True once a graceful [`JobRegistry::kill_all`] has started.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// While draining, drop jobs in `Kill` mode that no longer have a process.
    fn sweep_dead(&mut self, cx: &mut JobContext<'_>) {
        if !self.draining {
            return;
        }
        let dead: Vec<String> = self
            .jobs
            .values()
            .filter(|job| job.mode() == ScheduleMode::Kill && !job.state().has_process())
            .map(|job| job.name().to_string())
            .collect();

        for name in dead {
            if let Some(mut job) = self.jobs.remove(&name) {
                job.shutdown(cx);
                info!(job = %name, "decommissioned job destroyed");
            }
        }
    }
}
