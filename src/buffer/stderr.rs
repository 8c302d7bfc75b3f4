// src/buffer/stderr.rs

//! Stderr side of a job: every record goes straight to the log.

use tracing::warn;

use super::record::{RecordBuffer, RecordHandler, RecordStatus};

/// Forwards each stderr record to the diagnostic log, tagged with the job
/// name. Nothing is queued.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    buffer: RecordBuffer,
    sink: LogSink,
}

#[derive(Debug, Clone)]
struct LogSink {
    job: String,
    forwarded: u64,
}

impl LogSink {
    fn emit(&mut self, record: &str) {
        self.forwarded += 1;
        warn!(job = %self.job, "stderr: {}", record);
    }
}

impl RecordHandler for LogSink {
    fn on_record(&mut self, record: &str) -> RecordStatus {
        self.emit(record);
        RecordStatus::Continue
    }
}

impl ErrorChannel {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            buffer: RecordBuffer::new(),
            sink: LogSink {
                job: job.into(),
                forwarded: 0,
            },
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.feed(bytes, &mut self.sink);
    }

    /// Forward any complete records and then the unterminated tail, if one
    /// is pending. Used once the stream is closed.
    pub fn flush(&mut self) {
        self.buffer.flush(&mut self.sink);
        if let Some(tail) = self.buffer.take_partial() {
            self.sink.emit(&tail);
        }
    }

    /// Number of records forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.sink.forwarded
    }

    pub fn partial_len(&self) -> usize {
        self.buffer.pending_len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
