// src/host/tokio_reactor.rs

//! Production [`Reactor`] on top of tokio.
//!
//! - Timers are tokio tasks that post [`RuntimeEvent::TimerFired`].
//! - Each child pipe gets a reader task that copies bytes into a shared
//!   buffer and posts [`RuntimeEvent::PipeReadable`] once the owning job
//!   registered the pipe. `read_pipe` then only copies from that buffer, so
//!   it never blocks.
//! - Each child gets a reaper task that waits for exit, gives both pipe
//!   readers a bounded amount of time to reach EOF, and then posts
//!   [`RuntimeEvent::ProcessExited`].
//! - Signals are sent with `nix`.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::engine::RuntimeEvent;

use super::{
    ExitStatus, HostError, PipeId, PipeRead, Reactor, SignalKind, SpawnRequest, SpawnedProcess,
    TimerId,
};

/// How long the reaper waits for pipe readers after the child exited.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Size of one read performed by a pipe reader task.
const READER_CHUNK: usize = 4096;

#[derive(Debug)]
struct TimerEntry {
    job: String,
    periodic: bool,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct PipeBuffer {
    data: VecDeque<u8>,
    closed: bool,
    error: Option<String>,
    /// Job to notify; `None` until `register_pipe`.
    watcher: Option<String>,
    /// An undelivered readable event is already in flight.
    notified: bool,
}

impl PipeBuffer {
    fn readable(&self) -> bool {
        !self.data.is_empty() || self.closed
    }

    /// Job to notify now, if any.
    fn take_notification(&mut self) -> Option<String> {
        if self.notified || !self.readable() {
            return None;
        }
        let job = self.watcher.clone()?;
        self.notified = true;
        Some(job)
    }
}

type SharedPipe = Arc<Mutex<PipeBuffer>>;

#[derive(Debug)]
struct PipeEntry {
    buffer: SharedPipe,
    reader: AbortHandle,
}

/// Tokio-backed host reactor.
#[derive(Debug)]
pub struct TokioReactor {
    events: mpsc::Sender<RuntimeEvent>,
    next_id: u64,
    timers: HashMap<TimerId, TimerEntry>,
    pipes: HashMap<PipeId, PipeEntry>,
    drain_timeout: Duration,
}

impl TokioReactor {
    /// Create a reactor that posts its events to `events`.
    ///
    /// Must be used from within a tokio runtime.
    pub fn new(events: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            events,
            next_id: 1,
            timers: HashMap::new(),
            pipes: HashMap::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Number of live timers (for diagnostics).
    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn post(&self, event: RuntimeEvent) {
        let tx = self.events.clone();
        tokio::spawn(async move {
            let _ = tx.send(event).await;
        });
    }

    fn spawn_timer(
        &self,
        id: TimerId,
        job: String,
        first: Duration,
        period: Option<Duration>,
    ) -> JoinHandle<()> {
        let tx = self.events.clone();
        tokio::spawn(async move {
            match period {
                None => {
                    tokio::time::sleep(first).await;
                    let _ = tx.send(RuntimeEvent::TimerFired { job, timer: id }).await;
                }
                Some(every) => {
                    let every = every.max(Duration::from_millis(1));
                    let mut ticker = tokio::time::interval_at(Instant::now() + first, every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        let event = RuntimeEvent::TimerFired {
                            job: job.clone(),
                            timer: id,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_reader<R>(&mut self, reader: R) -> (PipeId, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pipe = PipeId(self.next_id());
        let buffer: SharedPipe = Arc::new(Mutex::new(PipeBuffer::default()));
        let handle = tokio::spawn(read_into(reader, Arc::clone(&buffer), self.events.clone(), pipe));
        self.pipes.insert(
            pipe,
            PipeEntry {
                buffer,
                reader: handle.abort_handle(),
            },
        );
        (pipe, handle)
    }
}

impl Drop for TokioReactor {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        for (_, pipe) in self.pipes.drain() {
            pipe.reader.abort();
        }
    }
}

impl Reactor for TokioReactor {
    fn register_timer(
        &mut self,
        job: &str,
        first: Duration,
        period: Option<Duration>,
    ) -> Result<TimerId, HostError> {
        let id = TimerId(self.next_id());
        let handle = self.spawn_timer(id, job.to_string(), first, period);
        self.timers.insert(
            id,
            TimerEntry {
                job: job.to_string(),
                periodic: period.is_some(),
                handle,
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
        let Some(entry) = self.timers.remove(&id) else {
            return Err(HostError::Timer(format!("reset of unknown {id}")));
        };
        entry.handle.abort();
        let handle = self.spawn_timer(id, entry.job.clone(), first, period);
        self.timers.insert(
            id,
            TimerEntry {
                job: entry.job,
                periodic: period.is_some(),
                handle,
            },
        );
        Ok(())
    }

    fn cancel_timer(&mut self, id: TimerId) {
        if let Some(entry) = self.timers.remove(&id) {
            entry.handle.abort();
        }
    }

    fn create_process(&mut self, request: &SpawnRequest<'_>) -> Result<SpawnedProcess, HostError> {
        let mut cmd = Command::new(request.path);
        #[cfg(unix)]
        cmd.arg0(request.job);
        cmd.args(request.args)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = request.cwd {
            cmd.current_dir(cwd);
        }

        let spawn_error = |reason: String| HostError::Spawn {
            path: request.path.display().to_string(),
            reason,
        };

        let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error("child exited before its pid was known".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Pipe("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HostError::Pipe("stderr was not captured".to_string()))?;

        let (stdout_pipe, stdout_reader) = self.spawn_reader(stdout);
        let (stderr_pipe, stderr_reader) = self.spawn_reader(stderr);

        let tx = self.events.clone();
        let job = request.job.to_string();
        let drain_timeout = self.drain_timeout;
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => convert_status(status),
                Err(e) => {
                    warn!(job = %job, pid, error = %e, "waiting for child failed");
                    ExitStatus::Exited(-1)
                }
            };

            let readers = async {
                let _ = stdout_reader.await;
                let _ = stderr_reader.await;
            };
            if tokio::time::timeout(drain_timeout, readers).await.is_err() {
                debug!(job = %job, pid, "pipes still open after exit; reaping anyway");
            }

            let _ = tx.send(RuntimeEvent::ProcessExited { job, pid, status }).await;
        });

        debug!(job = %request.job, pid, %stdout_pipe, %stderr_pipe, "process spawned");
        Ok(SpawnedProcess {
            pid,
            stdout: stdout_pipe,
            stderr: stderr_pipe,
        })
    }

    fn register_pipe(&mut self, job: &str, pipe: PipeId) -> Result<(), HostError> {
        let entry = self.pipes.get(&pipe).ok_or(HostError::UnknownPipe(pipe))?;
        let notify = {
            let mut buf = lock(&entry.buffer);
            buf.watcher = Some(job.to_string());
            buf.take_notification()
        };
        if let Some(job) = notify {
            self.post(RuntimeEvent::PipeReadable { job, pipe });
        }
        Ok(())
    }

    fn read_pipe(&mut self, pipe: PipeId, buf: &mut [u8]) -> PipeRead {
        let Some(entry) = self.pipes.get(&pipe) else {
            return PipeRead::Error(format!("unknown {pipe}"));
        };
        let mut shared = lock(&entry.buffer);

        if !shared.data.is_empty() {
            let n = buf.len().min(shared.data.len());
            for (dst, src) in buf.iter_mut().zip(shared.data.drain(..n)) {
                *dst = src;
            }
            return PipeRead::Data(n);
        }
        if let Some(e) = shared.error.take() {
            return PipeRead::Error(e);
        }
        if shared.closed {
            PipeRead::Eof
        } else {
            PipeRead::WouldBlock
        }
    }

    fn close_pipe(&mut self, pipe: PipeId) {
        if let Some(entry) = self.pipes.remove(&pipe) {
            lock(&entry.buffer).watcher = None;
            entry.reader.abort();
            trace!(%pipe, "pipe closed");
        }
    }

    /// Called by the runtime before dispatching a timer event.
    ///
    /// Returns `false` for timers that were cancelled after the event was
    /// posted. One-shot timers are forgotten here.
    fn acknowledge_timer(&mut self, id: TimerId) -> bool {
        match self.timers.get(&id) {
            None => false,
            Some(entry) if entry.periodic => true,
            Some(_) => {
                self.timers.remove(&id);
                true
            }
        }
    }

    /// Called by the runtime after a job handled a readable event.
    ///
    /// A job reads a bounded number of chunks per event; if bytes are left
    /// over, another event is posted so the rest is picked up on a later
    /// loop turn.
    fn pipe_dispatched(&mut self, pipe: PipeId) {
        let Some(entry) = self.pipes.get(&pipe) else {
            return;
        };
        let repost = {
            let mut buf = lock(&entry.buffer);
            buf.notified = false;
            buf.take_notification()
        };
        if let Some(job) = repost {
            trace!(job = %job, %pipe, "re-posting readable event for leftover bytes");
            self.post(RuntimeEvent::PipeReadable { job, pipe });
        }
    }

    #[cfg(unix)]
    fn send_signal(&mut self, pid: u32, signal: SignalKind) -> Result<(), HostError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let sig = match signal {
            SignalKind::Term => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
            SignalKind::Hup => Signal::SIGHUP,
        };
        kill(Pid::from_raw(pid as i32), sig).map_err(|e| HostError::Signal {
            pid,
            signal,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn send_signal(&mut self, _pid: u32, _signal: SignalKind) -> Result<(), HostError> {
        Err(HostError::Unsupported("signals"))
    }
}

async fn read_into<R>(mut reader: R, buffer: SharedPipe, events: mpsc::Sender<RuntimeEvent>, pipe: PipeId)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READER_CHUNK];
    loop {
        let res = reader.read(&mut chunk).await;
        let (notify, done) = {
            let mut buf = lock(&buffer);
            match res {
                Ok(0) => buf.closed = true,
                Ok(n) => buf.data.extend(&chunk[..n]),
                Err(e) => {
                    buf.error = Some(e.to_string());
                    buf.closed = true;
                }
            }
            (buf.take_notification(), buf.closed)
        };

        if let Some(job) = notify {
            if events.send(RuntimeEvent::PipeReadable { job, pipe }).await.is_err() {
                break;
            }
        }
        if done {
            break;
        }
    }
}

fn lock(buffer: &SharedPipe) -> std::sync::MutexGuard<'_, PipeBuffer> {
    // A panicking holder cannot leave the byte queue half-updated in a way
    // that matters here, so keep going with the inner value.
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitStatus::Signaled(sig);
        }
    }
    ExitStatus::Exited(-1)
}
