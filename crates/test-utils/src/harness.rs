use cronvisor::host::{ExitStatus, Reactor, TimerId};
use cronvisor::job::{Job, JobContext};
use cronvisor::registry::JobRegistry;

use crate::fake_reactor::FakeReactor;
use crate::recording_sink::RecordingSink;

/// Fake reactor plus recording sink, with shortcuts for driving a job or a
/// registry by hand.
#[derive(Debug, Default)]
pub struct Harness {
    pub reactor: FakeReactor,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cx(&mut self) -> JobContext<'_> {
        JobContext::new(&mut self.reactor, &mut self.sink)
    }

    /// Fire `id` at `job` the way the runtime does: acknowledged first, so
    /// one-shot timers disappear from the reactor.
    pub fn fire(&mut self, job: &mut Job, id: TimerId) {
        if self.reactor.acknowledge_timer(id) {
            let mut cx = self.cx();
            job.on_timer(id, &mut cx);
        }
    }

    /// Fire the job's run timer. Panics when none is armed.
    pub fn fire_run_timer(&mut self, job: &mut Job) {
        let id = job.run_timer().expect("job has no run timer");
        self.fire(job, id);
    }

    /// Fire the job's kill timer. Panics when none is armed.
    pub fn fire_kill_timer(&mut self, job: &mut Job) {
        let id = job.kill_timer().expect("job has no kill timer");
        self.fire(job, id);
    }

    /// Report the job's current child as exited with `status`.
    pub fn exit(&mut self, job: &mut Job, status: ExitStatus) {
        let pid = job.pid();
        let mut cx = self.cx();
        job.reap(pid, status, &mut cx);
    }

    /// Make the job's pipes readable and dispatch them.
    pub fn pump(&mut self, job: &mut Job) {
        let Some(spawn) = self.reactor.last_spawn().cloned() else {
            return;
        };
        let mut cx = self.cx();
        job.on_pipe_readable(spawn.stdout, &mut cx);
        job.on_pipe_readable(spawn.stderr, &mut cx);
    }

    /// Report the child of a registered job as exited.
    pub fn exit_in(&mut self, registry: &mut JobRegistry, name: &str, status: ExitStatus) {
        let pid = registry.find(name).map(|j| j.pid()).unwrap_or(0);
        let mut cx = self.cx();
        registry.on_exit(name, pid, status, &mut cx);
    }
}
