// src/job/lifecycle.rs

//! Starting, killing, reaping and reconfiguring the child process.

use tracing::{debug, error, info, warn};

use crate::host::{ExitStatus, SignalKind, SpawnRequest};
use crate::sink::JobEvent;

use super::core::secs;
use super::{
    Job, JobContext, JobError, JobState, KillOutcome, ReconfigOutcome, RunOutcome, ScheduleMode,
};

impl Job {
    /// Handle a run request (a periodic tick or an explicit trigger).
    ///
    /// - Idle: start a new process.
    /// - Still running with `kill` set: terminate the old instance and start
    ///   again once it has been reaped (`Busy`).
    /// - Still running without `kill`: skip (`Skipped`).
    pub fn run_job(&mut self, cx: &mut JobContext<'_>) -> Result<RunOutcome, JobError> {
        if self.mode == ScheduleMode::Kill {
            debug!(job = %self.name, "run requested for decommissioned job; skipping");
            return Ok(RunOutcome::Skipped);
        }

        match self.state {
            JobState::Idle => self.start_job(cx),
            JobState::Running | JobState::TermSent | JobState::KillSent => {
                if !self.opt_kill {
                    warn!(
                        job = %self.name,
                        pid = self.pid,
                        state = %self.state,
                        "job still running; skipping run request"
                    );
                    return Ok(RunOutcome::Skipped);
                }

                info!(
                    job = %self.name,
                    pid = self.pid,
                    state = %self.state,
                    "job still running; killing it before the next run"
                );
                self.restart_after_reap = true;
                if self.state == JobState::Running {
                    self.kill_job(false, cx)?;
                }
                Ok(RunOutcome::Busy)
            }
            JobState::Uninitialized | JobState::Dead => {
                debug!(job = %self.name, state = %self.state, "run requested in inactive state; skipping");
                Ok(RunOutcome::Skipped)
            }
        }
    }

    /// Start a process. Only valid while `Idle`.
    ///
    /// Output left over from the previous run is discarded (and reported).
    /// A failed spawn leaves the job `Idle`; a `WaitForExit` job then
    /// retries after `max(period, 1)` seconds.
    pub fn start_job(&mut self, cx: &mut JobContext<'_>) -> Result<RunOutcome, JobError> {
        if self.state != JobState::Idle {
            warn!(job = %self.name, state = %self.state, "refusing to start job that is not idle");
            return Err(JobError::NotIdle {
                job: self.name.clone(),
                state: self.state,
            });
        }
        if self.mode == ScheduleMode::Kill {
            return Ok(RunOutcome::Skipped);
        }

        let (stale_lines, stale_bytes) = self.output.reset();
        if stale_lines > 0 || stale_bytes > 0 {
            warn!(
                job = %self.name,
                lines = stale_lines,
                bytes = stale_bytes,
                "discarding stale output from the previous run"
            );
        }
        self.errors.reset();
        self.restart_after_reap = false;

        let request = SpawnRequest {
            job: &self.name,
            path: &self.path,
            args: &self.args,
            env: &self.env,
            cwd: self.cwd.as_deref(),
        };

        let spawned = match cx.reactor.create_process(&request) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(job = %self.name, path = %self.path.display(), error = %e, "failed to start job");
                if self.mode == ScheduleMode::WaitForExit {
                    self.cancel_run_timer(cx);
                    self.arm_run_timer(secs(self.period.max(1)), None, cx);
                }
                return Err(JobError::Host {
                    job: self.name.clone(),
                    source: e,
                });
            }
        };

        self.pid = spawned.pid;
        self.stdout = Some(spawned.stdout);
        self.stderr = Some(spawned.stderr);
        self.state = JobState::Running;
        self.run_count += 1;

        for pipe in [spawned.stdout, spawned.stderr] {
            if let Err(e) = cx.reactor.register_pipe(&self.name, pipe) {
                // Output is still collected when the process is reaped.
                warn!(job = %self.name, %pipe, error = %e, "failed to register pipe");
            }
        }

        info!(
            job = %self.name,
            pid = self.pid,
            run = self.run_count,
            path = %self.path.display(),
            "job started"
        );
        cx.sink.on_job_event(&self.name, JobEvent::Started { pid: self.pid });
        Ok(RunOutcome::Started)
    }

    /// Terminate the running process.
    ///
    /// - `force`, or a second request while `TermSent`: SIGKILL.
    /// - Otherwise: SIGTERM plus a one-shot timer that escalates to SIGKILL
    ///   after the kill grace period.
    pub fn kill_job(&mut self, force: bool, cx: &mut JobContext<'_>) -> Result<KillOutcome, JobError> {
        match self.state {
            JobState::Uninitialized | JobState::Idle | JobState::Dead => {
                debug!(job = %self.name, state = %self.state, "kill requested but no process");
                Ok(KillOutcome::NotRunning)
            }
            JobState::TermSent => self.send_kill(cx),
            JobState::Running | JobState::KillSent if force => self.send_kill(cx),
            JobState::Running => {
                self.signal(SignalKind::Term, cx)?;
                self.state = JobState::TermSent;
                self.cancel_kill_timer(cx);

                let grace = self.limits.kill_grace;
                match cx.reactor.register_timer(&self.name, grace, None) {
                    Ok(id) => self.kill_timer = Some(id),
                    Err(e) => {
                        error!(job = %self.name, error = %e, "failed to arm kill timer");
                    }
                }
                info!(job = %self.name, pid = self.pid, ?grace, "sent SIGTERM");
                Ok(KillOutcome::TermSent)
            }
            JobState::KillSent => {
                debug!(job = %self.name, pid = self.pid, "SIGKILL already sent");
                Err(JobError::NothingToKill {
                    job: self.name.clone(),
                    state: self.state,
                })
            }
        }
    }

    fn send_kill(&mut self, cx: &mut JobContext<'_>) -> Result<KillOutcome, JobError> {
        self.signal(SignalKind::Kill, cx)?;
        self.state = JobState::KillSent;
        self.cancel_kill_timer(cx);
        info!(job = %self.name, pid = self.pid, "sent SIGKILL");
        Ok(KillOutcome::KillSent)
    }

    /// Process-exit notification for this job's child.
    ///
    /// Always leaves `pid == 0` and a state without a process. Remaining
    /// output is drained and delivered before anything is rescheduled.
    pub fn reap(&mut self, pid: u32, status: ExitStatus, cx: &mut JobContext<'_>) {
        match status {
            ExitStatus::Exited(code) => {
                info!(job = %self.name, pid, code, "job exited");
            }
            ExitStatus::Signaled(signal) => {
                info!(job = %self.name, pid, signal, "job killed by signal");
            }
        }
        if pid != self.pid {
            warn!(job = %self.name, expected = self.pid, got = pid, "exit pid does not match running pid");
        }
        self.pid = 0;

        self.drain_after_exit(cx);
        if self.output.queue_size() > 0 {
            debug!(job = %self.name, lines = self.output.queue_size(), "delivering unterminated final block");
            self.drain_output_block(cx);
        }
        cx.sink.on_job_event(&self.name, JobEvent::Died { pid, status });

        let prior = self.state;
        match prior {
            JobState::Running => {
                self.state = JobState::Idle;
            }
            JobState::TermSent | JobState::KillSent => {
                self.cancel_kill_timer(cx);
                self.state = JobState::Idle;
            }
            JobState::Uninitialized | JobState::Idle | JobState::Dead => {
                warn!(job = %self.name, state = %prior, "exit notification for a job with no process");
            }
        }

        if let Some((mode, period)) = self.pending_schedule.take() {
            let old_mode = self.mode;
            self.mode = mode;
            self.period = period;
            info!(job = %self.name, %mode, period, "applying deferred schedule change");
            self.rearm_run_timer(old_mode, cx);
        }

        if self.mode == ScheduleMode::Kill {
            self.cancel_run_timer(cx);
            self.cancel_kill_timer(cx);
            self.restart_after_reap = false;
            self.state = JobState::Dead;
            info!(job = %self.name, "job decommissioned");
            return;
        }

        if self.state != JobState::Idle || !prior.has_process() {
            return;
        }

        if std::mem::take(&mut self.restart_after_reap) {
            debug!(job = %self.name, "restarting after requested kill");
            if let Err(e) = self.start_job(cx) {
                debug!(job = %self.name, error = %e, "restart after kill did not start");
            }
        } else if self.mode == ScheduleMode::WaitForExit {
            self.schedule_restart(cx);
        }
    }

    /// Ask a running job to reload its settings (SIGHUP).
    ///
    /// Refused until the job has produced at least one output block, so a
    /// freshly started child is not signalled while it is still starting.
    pub fn reconfig(&mut self, cx: &mut JobContext<'_>) -> Result<ReconfigOutcome, JobError> {
        if !self.opt_reconfig {
            return Ok(ReconfigOutcome::Disabled);
        }
        if self.state != JobState::Running {
            debug!(job = %self.name, state = %self.state, "not running; no SIGHUP needed");
            return Ok(ReconfigOutcome::NotRunning);
        }
        if self.num_output_blocks == 0 {
            info!(
                job = %self.name,
                pid = self.pid,
                "not sending SIGHUP: job has not produced an output block yet"
            );
            return Ok(ReconfigOutcome::AwaitingFirstBlock);
        }

        self.signal(SignalKind::Hup, cx)?;
        info!(job = %self.name, pid = self.pid, "sent SIGHUP");
        Ok(ReconfigOutcome::Signaled)
    }

    /// Tear the job down before it is dropped: cancel both timers, SIGKILL
    /// any child and release the pipes. The job ends up `Dead`.
    pub fn shutdown(&mut self, cx: &mut JobContext<'_>) {
        self.mode = ScheduleMode::Kill;
        self.pending_schedule = None;
        self.restart_after_reap = false;
        self.cancel_run_timer(cx);
        self.cancel_kill_timer(cx);

        if self.pid != 0 {
            if let Err(e) = self.signal(SignalKind::Kill, cx) {
                warn!(job = %self.name, error = %e, "failed to kill job during teardown");
            } else {
                info!(job = %self.name, pid = self.pid, "killed job during teardown");
            }
        }

        self.close_pipes(cx);
        self.pid = 0;
        self.state = JobState::Dead;
    }

    fn signal(&mut self, kind: SignalKind, cx: &mut JobContext<'_>) -> Result<(), JobError> {
        if self.pid == 0 {
            return Err(JobError::NothingToKill {
                job: self.name.clone(),
                state: self.state,
            });
        }
        cx.reactor.send_signal(self.pid, kind).map_err(|e| {
            warn!(job = %self.name, pid = self.pid, signal = ?kind, error = %e, "failed to signal job");
            JobError::Host {
                job: self.name.clone(),
                source: e,
            }
        })
    }
}
