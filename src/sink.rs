// src/sink.rs

//! Consumer side: where harvested output and lifecycle events go.

use std::io::Write;

use tracing::{debug, warn};

use crate::host::ExitStatus;

/// Lifecycle notifications for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started { pid: u32 },
    Died { pid: u32, status: ExitStatus },
}

/// Receives completed output blocks and job lifecycle events.
pub trait JobSink {
    /// Called once per record of a completed block (`Some`), then once
    /// with `None` to mark the end of that block.
    fn on_output_line(&mut self, job: &str, line: Option<&str>);

    fn on_job_event(&mut self, job: &str, event: JobEvent) {
        debug!(job, ?event, "job event");
    }
}

/// Writes harvested records as `<job>: <record>` lines, with `<job>: -`
/// closing each block.
///
/// The daemon binary uses this with stdout; logs go to stderr.
#[derive(Debug)]
pub struct PrintSink<W: Write> {
    out: W,
}

impl<W: Write> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl PrintSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> JobSink for PrintSink<W> {
    fn on_output_line(&mut self, job: &str, line: Option<&str>) {
        let res = match line {
            Some(line) => writeln!(self.out, "{job}: {line}"),
            None => writeln!(self.out, "{job}: -").and_then(|_| self.out.flush()),
        };
        if let Err(e) = res {
            warn!(job, error = %e, "failed to write job output");
        }
    }
}
