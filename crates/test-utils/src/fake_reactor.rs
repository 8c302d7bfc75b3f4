use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use cronvisor::host::{
    HostError, PipeId, PipeRead, Reactor, SignalKind, SpawnRequest, SpawnedProcess, TimerId,
};

/// First pid handed out by [`FakeReactor`].
pub const FIRST_PID: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTimer {
    pub job: String,
    pub first: Duration,
    pub period: Option<Duration>,
}

/// Everything a job asked the fake to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub job: String,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub pid: u32,
    pub stdout: PipeId,
    pub stderr: PipeId,
}

#[derive(Debug, Default)]
struct ScriptedPipe {
    chunks: VecDeque<Vec<u8>>,
    eof: bool,
    error: Option<String>,
}

/// A fake reactor that:
/// - records every timer, signal, spawn and pipe operation
/// - serves pipe reads from bytes scripted by the test
/// - never touches the OS
///
/// Tests then fire timers and exits by hand through the job or registry.
#[derive(Debug, Default)]
pub struct FakeReactor {
    next_id: u64,
    next_pid: u32,
    /// Timers that are currently armed.
    pub timers: BTreeMap<TimerId, FakeTimer>,
    pub cancelled: Vec<TimerId>,
    pub resets: Vec<(TimerId, Duration, Option<Duration>)>,
    pub spawns: Vec<SpawnRecord>,
    pub signals: Vec<(u32, SignalKind)>,
    pub registered_pipes: Vec<(String, PipeId)>,
    pub closed_pipes: Vec<PipeId>,
    pipes: HashMap<PipeId, ScriptedPipe>,
    fail_spawns: usize,
    fail_signals: bool,
}

impl FakeReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` spawns fail.
    pub fn fail_next_spawns(&mut self, n: usize) {
        self.fail_spawns = n;
    }

    pub fn fail_signals(&mut self, on: bool) {
        self.fail_signals = on;
    }

    /// Queue bytes to be returned by `read_pipe`. Each call is served as
    /// one or more reads, never merged with the next chunk.
    pub fn push_pipe(&mut self, pipe: PipeId, bytes: impl AsRef<[u8]>) {
        self.pipes
            .entry(pipe)
            .or_default()
            .chunks
            .push_back(bytes.as_ref().to_vec());
    }

    /// Report EOF once the queued bytes have been read.
    pub fn close_write_end(&mut self, pipe: PipeId) {
        self.pipes.entry(pipe).or_default().eof = true;
    }

    pub fn fail_pipe(&mut self, pipe: PipeId, reason: &str) {
        self.pipes.entry(pipe).or_default().error = Some(reason.to_string());
    }

    /// Queue stdout bytes for the most recent spawn.
    pub fn push_stdout(&mut self, bytes: impl AsRef<[u8]>) {
        if let Some(pipe) = self.last_spawn().map(|s| s.stdout) {
            self.push_pipe(pipe, bytes);
        }
    }

    /// Queue stderr bytes for the most recent spawn.
    pub fn push_stderr(&mut self, bytes: impl AsRef<[u8]>) {
        if let Some(pipe) = self.last_spawn().map(|s| s.stderr) {
            self.push_pipe(pipe, bytes);
        }
    }

    pub fn last_spawn(&self) -> Option<&SpawnRecord> {
        self.spawns.last()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.len()
    }

    pub fn timer(&self, id: TimerId) -> Option<&FakeTimer> {
        self.timers.get(&id)
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Ids of the armed timers belonging to `job`.
    pub fn timers_for(&self, job: &str) -> Vec<TimerId> {
        self.timers
            .iter()
            .filter(|(_, t)| t.job == job)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn signals_to(&self, pid: u32) -> Vec<SignalKind> {
        self.signals
            .iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn is_pipe_closed(&self, pipe: PipeId) -> bool {
        self.closed_pipes.contains(&pipe)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Reactor for FakeReactor {
    fn register_timer(
        &mut self,
        job: &str,
        first: Duration,
        period: Option<Duration>,
    ) -> Result<TimerId, HostError> {
        let id = TimerId(self.next_id());
        self.timers.insert(
            id,
            FakeTimer {
                job: job.to_string(),
                first,
                period,
            },
        );
        Ok(id)
    }

    fn reset_timer(
        &mut self,
        id: TimerId,
        first: Duration,
        period: Option<Duration>,
    ) -> Result<(), HostError> {
        let Some(timer) = self.timers.get_mut(&id) else {
            return Err(HostError::Timer(format!("reset of unknown {id}")));
        };
        timer.first = first;
        timer.period = period;
        self.resets.push((id, first, period));
        Ok(())
    }

    fn cancel_timer(&mut self, id: TimerId) {
        if self.timers.remove(&id).is_some() {
            self.cancelled.push(id);
        }
    }

    fn create_process(&mut self, request: &SpawnRequest<'_>) -> Result<SpawnedProcess, HostError> {
        if self.fail_spawns > 0 {
            self.fail_spawns -= 1;
            return Err(HostError::Spawn {
                path: request.path.display().to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let pid = FIRST_PID + self.next_pid;
        self.next_pid += 1;
        let stdout = PipeId(self.next_id());
        let stderr = PipeId(self.next_id());

        self.spawns.push(SpawnRecord {
            job: request.job.to_string(),
            path: request.path.to_path_buf(),
            args: request.args.to_vec(),
            env: request.env.to_vec(),
            cwd: request.cwd.map(|p| p.to_path_buf()),
            pid,
            stdout,
            stderr,
        });
        Ok(SpawnedProcess {
            pid,
            stdout,
            stderr,
        })
    }

    fn register_pipe(&mut self, job: &str, pipe: PipeId) -> Result<(), HostError> {
        self.registered_pipes.push((job.to_string(), pipe));
        Ok(())
    }

    fn read_pipe(&mut self, pipe: PipeId, buf: &mut [u8]) -> PipeRead {
        let Some(script) = self.pipes.get_mut(&pipe) else {
            return PipeRead::WouldBlock;
        };

        if let Some(chunk) = script.chunks.front_mut() {
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                script.chunks.pop_front();
            }
            return PipeRead::Data(n);
        }
        if let Some(e) = script.error.take() {
            return PipeRead::Error(e);
        }
        if script.eof {
            PipeRead::Eof
        } else {
            PipeRead::WouldBlock
        }
    }

    fn close_pipe(&mut self, pipe: PipeId) {
        self.pipes.remove(&pipe);
        self.closed_pipes.push(pipe);
    }

    fn send_signal(&mut self, pid: u32, signal: SignalKind) -> Result<(), HostError> {
        if self.fail_signals {
            return Err(HostError::Signal {
                pid,
                signal,
                reason: "injected failure".to_string(),
            });
        }
        self.signals.push((pid, signal));
        Ok(())
    }

    fn acknowledge_timer(&mut self, id: TimerId) -> bool {
        match self.timers.get(&id) {
            None => false,
            Some(t) if t.period.is_some() => true,
            Some(_) => {
                self.timers.remove(&id);
                true
            }
        }
    }
}
