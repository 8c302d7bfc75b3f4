// src/job/core.rs

//! The `Job` type: identity, settings, scheduling and timer dispatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::buffer::{ErrorChannel, OutputChannel};
use crate::host::{PipeId, TimerId};

use super::{JobContext, JobDescriptor, JobError, JobLimits, JobState, ScheduleMode};

/// One supervised external program.
///
/// Invariant: `pid != 0` exactly when the state is `Running`, `TermSent` or
/// `KillSent`.
#[derive(Debug)]
pub struct Job {
    pub(super) name: String,
    pub(super) path: PathBuf,
    pub(super) args: Vec<String>,
    pub(super) env: Vec<(String, String)>,
    pub(super) cwd: Option<PathBuf>,

    pub(super) mode: ScheduleMode,
    pub(super) period: u64,
    pub(super) opt_kill: bool,
    pub(super) opt_reconfig: bool,
    pub(super) limits: JobLimits,

    pub(super) state: JobState,
    pub(super) pid: u32,
    pub(super) run_timer: Option<TimerId>,
    pub(super) kill_timer: Option<TimerId>,
    pub(super) stdout: Option<PipeId>,
    pub(super) stderr: Option<PipeId>,
    pub(super) num_output_blocks: u64,
    pub(super) run_count: u64,
    /// Set when a run request killed the previous instance; the job
    /// restarts as soon as that instance is reaped.
    pub(super) restart_after_reap: bool,
    /// Schedule change requested during a kill sequence.
    pub(super) pending_schedule: Option<(ScheduleMode, u64)>,
    pub(super) marked: bool,

    pub(super) output: OutputChannel,
    pub(super) errors: ErrorChannel,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        mode: ScheduleMode,
        period: u64,
        limits: JobLimits,
    ) -> Result<Self, JobError> {
        let name = name.into();
        validate_schedule(&name, mode, period)?;

        Ok(Self {
            errors: ErrorChannel::new(name.clone()),
            output: OutputChannel::new(None),
            name,
            path: path.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            mode,
            period,
            opt_kill: false,
            opt_reconfig: false,
            limits,
            state: JobState::Uninitialized,
            pid: 0,
            run_timer: None,
            kill_timer: None,
            stdout: None,
            stderr: None,
            num_output_blocks: 0,
            run_count: 0,
            restart_after_reap: false,
            pending_schedule: None,
            marked: false,
        })
    }

    /// Build an uninitialized job from a parsed descriptor.
    pub fn from_descriptor(desc: &JobDescriptor, limits: JobLimits) -> Result<Self, JobError> {
        let mut job = Job::new(
            desc.name.clone(),
            desc.path.clone(),
            desc.mode,
            desc.period,
            limits,
        )?;
        job.set_settings(desc);
        Ok(job)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Full argument vector as the child sees it; argv[0] is the job name.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.output.prefix()
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Period in seconds.
    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn kill_enabled(&self) -> bool {
        self.opt_kill
    }

    pub fn reconfig_enabled(&self) -> bool {
        self.opt_reconfig
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Pid of the running child, 0 when there is none.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn run_timer(&self) -> Option<TimerId> {
        self.run_timer
    }

    pub fn kill_timer(&self) -> Option<TimerId> {
        self.kill_timer
    }

    /// Completed output blocks produced over the job's lifetime.
    pub fn num_output_blocks(&self) -> u64 {
        self.num_output_blocks
    }

    /// Processes successfully started over the job's lifetime.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Lines waiting in the output queue.
    pub fn queued_lines(&self) -> usize {
        self.output.queue_size()
    }

    pub fn pending_schedule(&self) -> Option<(ScheduleMode, u64)> {
        self.pending_schedule
    }

    pub fn limits(&self) -> JobLimits {
        self.limits
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn set_env(&mut self, env: Vec<(String, String)>) {
        self.env = env;
    }

    pub fn set_cwd(&mut self, cwd: Option<PathBuf>) {
        self.cwd = cwd;
    }

    pub fn set_prefix(&mut self, prefix: Option<String>) {
        self.output.set_prefix(prefix);
    }

    pub fn set_kill(&mut self, kill: bool) {
        self.opt_kill = kill;
    }

    pub fn set_reconfig(&mut self, reconfig: bool) {
        self.opt_reconfig = reconfig;
    }

    pub fn set_limits(&mut self, limits: JobLimits) {
        self.limits = limits;
    }

    pub fn mark(&mut self) {
        self.marked = true;
    }

    pub fn is_marked(&self) -> bool {
        self.marked
    }

    pub fn clear_mark(&mut self) {
        self.marked = false;
    }

    /// Take over every setting from `desc` and re-derive the schedule.
    ///
    /// Path, arguments, environment and the like apply from the next run
    /// on; a running process keeps its identity.
    pub fn apply_descriptor(
        &mut self,
        desc: &JobDescriptor,
        cx: &mut JobContext<'_>,
    ) -> Result<(), JobError> {
        validate_schedule(&self.name, desc.mode, desc.period)?;
        self.set_settings(desc);
        self.set_schedule(desc.mode, desc.period, cx)
    }

    fn set_settings(&mut self, desc: &JobDescriptor) {
        self.path = desc.path.clone();
        self.args = desc.args.clone();
        self.env = desc.env.clone();
        self.cwd = desc.cwd.clone();
        self.output.set_prefix(desc.prefix.clone());
        self.opt_kill = desc.kill;
        self.opt_reconfig = desc.reconfig;
    }

    /// Leave `Uninitialized` and kick off the first schedule.
    pub fn initialize(&mut self, cx: &mut JobContext<'_>) -> Result<(), JobError> {
        if self.state != JobState::Uninitialized {
            warn!(job = %self.name, state = %self.state, "initialize called twice");
            return Err(JobError::AlreadyInitialized(self.name.clone()));
        }

        self.state = JobState::Idle;
        info!(job = %self.name, mode = %self.mode, period = self.period, "job initialized");

        match self.mode {
            ScheduleMode::Periodic => {
                // First run on the next loop turn, then every `period`.
                let every = secs(self.period);
                self.arm_run_timer(Duration::ZERO, Some(every), cx);
            }
            ScheduleMode::WaitForExit => {
                if let Err(e) = self.start_job(cx) {
                    debug!(job = %self.name, error = %e, "first start did not happen");
                }
            }
            ScheduleMode::Kill => {
                self.state = JobState::Dead;
            }
        }
        Ok(())
    }

    /// Change the schedule.
    ///
    /// A periodic schedule needs a non-zero period. An unchanged schedule is
    /// a no-op. While a kill sequence is in progress the change is deferred
    /// until the process is reaped (switching to `Kill` always applies
    /// immediately). A `Dead` job moved off `Kill` becomes `Idle` again.
    pub fn set_schedule(
        &mut self,
        mode: ScheduleMode,
        period: u64,
        cx: &mut JobContext<'_>,
    ) -> Result<(), JobError> {
        validate_schedule(&self.name, mode, period)?;

        if mode == self.mode && period == self.period {
            self.pending_schedule = None;
            debug!(job = %self.name, "schedule unchanged");
            return Ok(());
        }

        if self.state.is_killing() && mode != ScheduleMode::Kill {
            info!(
                job = %self.name,
                state = %self.state,
                %mode,
                period,
                "kill in progress; deferring schedule change until exit"
            );
            self.pending_schedule = Some((mode, period));
            return Ok(());
        }

        let old_mode = self.mode;
        self.mode = mode;
        self.period = period;
        self.pending_schedule = None;
        info!(job = %self.name, %mode, period, "schedule changed");

        if self.state == JobState::Uninitialized {
            return Ok(());
        }
        if self.state == JobState::Dead && mode != ScheduleMode::Kill {
            self.state = JobState::Idle;
            info!(job = %self.name, "decommissioned job re-enabled");
        }

        self.rearm_run_timer(old_mode, cx);

        match mode {
            ScheduleMode::WaitForExit => {
                if self.state == JobState::Idle {
                    self.schedule_restart(cx);
                }
            }
            ScheduleMode::Periodic => {}
            ScheduleMode::Kill => {
                self.restart_after_reap = false;
                match self.state {
                    JobState::Running => {
                        if let Err(e) = self.kill_job(false, cx) {
                            warn!(job = %self.name, error = %e, "failed to stop decommissioned job");
                        }
                    }
                    JobState::Idle => {
                        self.state = JobState::Dead;
                        info!(job = %self.name, "idle job decommissioned");
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Bring the run timer in line with the current mode and period.
    ///
    /// Never starts a process.
    pub(super) fn rearm_run_timer(&mut self, old_mode: ScheduleMode, cx: &mut JobContext<'_>) {
        match self.mode {
            ScheduleMode::Periodic => {
                let every = secs(self.period);
                if let (ScheduleMode::Periodic, Some(id)) = (old_mode, self.run_timer) {
                    match cx.reactor.reset_timer(id, every, Some(every)) {
                        Ok(()) => {
                            debug!(job = %self.name, timer = %id, "periodic timer reset");
                            return;
                        }
                        Err(e) => {
                            warn!(job = %self.name, timer = %id, error = %e, "failed to reset timer; re-registering");
                        }
                    }
                }
                self.cancel_run_timer(cx);
                self.arm_run_timer(every, Some(every), cx);
            }
            ScheduleMode::WaitForExit | ScheduleMode::Kill => {
                self.cancel_run_timer(cx);
            }
        }
    }

    /// WaitForExit rule after reaching `Idle`: restart now when the period
    /// is 0, otherwise after `period` seconds.
    pub(super) fn schedule_restart(&mut self, cx: &mut JobContext<'_>) {
        if self.period == 0 {
            debug!(job = %self.name, "period 0; restarting immediately");
            if let Err(e) = self.start_job(cx) {
                debug!(job = %self.name, error = %e, "immediate restart did not happen");
            }
        } else {
            self.cancel_run_timer(cx);
            self.arm_run_timer(secs(self.period), None, cx);
        }
    }

    /// Dispatch a timer tick addressed to this job.
    pub fn on_timer(&mut self, id: TimerId, cx: &mut JobContext<'_>) {
        if self.kill_timer == Some(id) {
            self.kill_timer = None;
            info!(job = %self.name, pid = self.pid, "kill grace period expired; escalating");
            if let Err(e) = self.kill_job(true, cx) {
                debug!(job = %self.name, error = %e, "escalation did nothing");
            }
            return;
        }

        if self.run_timer != Some(id) {
            debug!(job = %self.name, timer = %id, "ignoring stale timer");
            return;
        }

        match self.mode {
            ScheduleMode::Periodic => {
                if let Err(e) = self.run_job(cx) {
                    debug!(job = %self.name, error = %e, "periodic run failed");
                }
            }
            ScheduleMode::WaitForExit => {
                // One-shot restart timer: it is spent now.
                self.run_timer = None;
                if let Err(e) = self.start_job(cx) {
                    debug!(job = %self.name, error = %e, "delayed restart failed");
                }
            }
            ScheduleMode::Kill => {
                debug!(job = %self.name, "run timer fired for decommissioned job");
            }
        }
    }

    pub(super) fn arm_run_timer(
        &mut self,
        first: Duration,
        period: Option<Duration>,
        cx: &mut JobContext<'_>,
    ) {
        match cx.reactor.register_timer(&self.name, first, period) {
            Ok(id) => {
                debug!(job = %self.name, timer = %id, ?first, ?period, "run timer armed");
                self.run_timer = Some(id);
            }
            Err(e) => {
                error!(job = %self.name, error = %e, "failed to arm run timer");
            }
        }
    }

    pub(super) fn cancel_run_timer(&mut self, cx: &mut JobContext<'_>) {
        if let Some(id) = self.run_timer.take() {
            cx.reactor.cancel_timer(id);
            debug!(job = %self.name, timer = %id, "run timer cancelled");
        }
    }

    pub(super) fn cancel_kill_timer(&mut self, cx: &mut JobContext<'_>) {
        if let Some(id) = self.kill_timer.take() {
            cx.reactor.cancel_timer(id);
            debug!(job = %self.name, timer = %id, "kill timer cancelled");
        }
    }
}

fn validate_schedule(job: &str, mode: ScheduleMode, period: u64) -> Result<(), JobError> {
    if mode == ScheduleMode::Periodic && period == 0 {
        return Err(JobError::InvalidSchedule {
            job: job.to_string(),
            reason: "periodic jobs need a non-zero period".to_string(),
        });
    }
    Ok(())
}

pub(super) fn secs(period: u64) -> Duration {
    Duration::from_secs(period)
}
