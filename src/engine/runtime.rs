// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::{CronvisorError, Result};
use crate::host::Reactor;
use crate::job::JobDescriptor;
use crate::sink::JobSink;

use super::core::CoreSupervisor;
use super::{CoreCommand, RuntimeEvent, SupervisorOptions};

/// Cloneable handle for feeding control events into a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl RuntimeHandle {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// Replace the job list (mark-sweep reconcile).
    pub async fn reload(&self, descriptors: Vec<JobDescriptor>) -> Result<()> {
        self.send(RuntimeEvent::Reload(descriptors)).await
    }

    /// SIGHUP every job that accepts it.
    pub async fn reconfig(&self) -> Result<()> {
        self.send(RuntimeEvent::Reconfig).await
    }

    pub async fn shutdown(&self, force: bool) -> Result<()> {
        self.send(RuntimeEvent::Shutdown { force }).await
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CronvisorError::Other(anyhow!("runtime is no longer running")))
    }
}

/// Async shell around [`CoreSupervisor`].
///
/// Owns the event receiver, the reactor and the output sink. Events are
/// handled strictly one at a time, so job callbacks never interleave.
pub struct Runtime<R: Reactor, S: JobSink> {
    core: CoreSupervisor,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    handle: RuntimeHandle,
    reactor: R,
    sink: S,
    shutdown_timeout: Duration,
}

impl<R: Reactor, S: JobSink> fmt::Debug for Runtime<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl<R: Reactor, S: JobSink> Runtime<R, S> {
    /// `event_tx` must be the sender paired with `event_rx`; the reactor is
    /// expected to post its events on a clone of it.
    pub fn new(
        options: &SupervisorOptions,
        event_tx: mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        reactor: R,
        sink: S,
    ) -> Self {
        Self {
            core: CoreSupervisor::new(options),
            event_rx,
            handle: RuntimeHandle::new(event_tx),
            reactor,
            sink,
            shutdown_timeout: options.shutdown_timeout,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Main event loop.
    ///
    /// Loads `jobs`, then handles events until shutdown has completed (or
    /// the channel closes). Returns the sink so callers can inspect what
    /// was written.
    pub async fn run(mut self, jobs: Vec<JobDescriptor>) -> Result<S> {
        info!(jobs = jobs.len(), "cronvisor runtime started");
        self.core.load(&jobs, &mut self.reactor, &mut self.sink);

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");
            let step = self.core.step(event, &mut self.reactor, &mut self.sink);

            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                info!("supervisor stopped");
                break;
            }
        }

        info!("runtime exiting");
        Ok(self.sink)
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::ArmShutdownDeadline => {
                let handle = self.handle.clone();
                let timeout = self.shutdown_timeout;
                debug!(?timeout, "shutdown deadline armed");
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = handle.shutdown(true).await;
                });
            }
        }
    }
}
