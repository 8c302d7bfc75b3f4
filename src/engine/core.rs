// src/engine/core.rs

//! Pure core of the supervisor.
//!
//! [`CoreSupervisor`] consumes [`RuntimeEvent`]s and applies them to the
//! [`JobRegistry`]. All side effects go through the reactor and sink passed
//! to [`CoreSupervisor::step`], so the core can be driven in tests with a
//! fake reactor and no tokio at all.

use tracing::{debug, info, warn};

use crate::host::Reactor;
use crate::job::{JobContext, JobDescriptor};
use crate::registry::{JobRegistry, ReconcileReport};
use crate::sink::JobSink;

use super::{RuntimeEvent, SupervisorOptions};

/// Work the IO shell must do on behalf of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreCommand {
    /// A graceful shutdown started: post `Shutdown { force: true }` once
    /// `shutdown_timeout` has elapsed.
    ArmShutdownDeadline,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn running() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Supervising,
    Draining,
    Stopped,
}

#[derive(Debug)]
pub struct CoreSupervisor {
    registry: JobRegistry,
    phase: Phase,
}

impl CoreSupervisor {
    pub fn new(options: &SupervisorOptions) -> Self {
        Self {
            registry: JobRegistry::new(options.job_limits()),
            phase: Phase::Supervising,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn is_draining(&self) -> bool {
        self.phase == Phase::Draining
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    /// Reconcile against `descriptors` (startup and reload).
    pub fn load(
        &mut self,
        descriptors: &[JobDescriptor],
        reactor: &mut dyn Reactor,
        sink: &mut dyn JobSink,
    ) -> Option<ReconcileReport> {
        if self.phase != Phase::Supervising {
            warn!("ignoring job list while shutting down");
            return None;
        }
        let mut cx = JobContext::new(reactor, sink);
        let report = self.registry.reconcile(descriptors, &mut cx);
        if self.registry.is_empty() {
            warn!("no jobs are being supervised");
        }
        Some(report)
    }

    /// Handle a single event.
    pub fn step(
        &mut self,
        event: RuntimeEvent,
        reactor: &mut dyn Reactor,
        sink: &mut dyn JobSink,
    ) -> CoreStep {
        if self.phase == Phase::Stopped {
            debug!(?event, "event after stop ignored");
            return CoreStep {
                commands: Vec::new(),
                keep_running: false,
            };
        }

        let mut step = CoreStep::running();

        match event {
            RuntimeEvent::TimerFired { job, timer } => {
                if reactor.acknowledge_timer(timer) {
                    let mut cx = JobContext::new(reactor, sink);
                    self.registry.on_timer(&job, timer, &mut cx);
                } else {
                    debug!(job = %job, %timer, "stale timer event dropped");
                }
            }
            RuntimeEvent::PipeReadable { job, pipe } => {
                {
                    let mut cx = JobContext::new(reactor, sink);
                    self.registry.on_pipe_readable(&job, pipe, &mut cx);
                }
                reactor.pipe_dispatched(pipe);
            }
            RuntimeEvent::ProcessExited { job, pid, status } => {
                let mut cx = JobContext::new(reactor, sink);
                self.registry.on_exit(&job, pid, status, &mut cx);
            }
            RuntimeEvent::Reload(descriptors) => {
                self.load(&descriptors, reactor, sink);
            }
            RuntimeEvent::Reconfig => {
                if self.phase == Phase::Supervising {
                    let mut cx = JobContext::new(reactor, sink);
                    let n = self.registry.reconfig(&mut cx);
                    info!(signaled = n, "reconfig broadcast");
                }
            }
            RuntimeEvent::Shutdown { force } => {
                let mut cx = JobContext::new(reactor, sink);
                if force {
                    info!("forced shutdown");
                    self.registry.kill_all(true, &mut cx);
                } else if self.phase == Phase::Supervising {
                    info!("graceful shutdown requested");
                    self.phase = Phase::Draining;
                    self.registry.kill_all(false, &mut cx);
                    step.commands.push(CoreCommand::ArmShutdownDeadline);
                } else {
                    debug!("shutdown already in progress");
                }
                if force {
                    self.phase = Phase::Stopped;
                }
            }
        }

        if self.phase == Phase::Draining && self.registry.shutdown_ok() {
            // Nothing is running any more; drop whatever is left.
            let mut cx = JobContext::new(reactor, sink);
            self.registry.kill_all(true, &mut cx);
            self.phase = Phase::Stopped;
            info!("all jobs stopped");
        }

        step.keep_running = self.phase != Phase::Stopped;
        step
    }
}
