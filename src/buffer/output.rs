// src/buffer/output.rs

//! Stdout side of a job: records grouped into sentinel-terminated blocks.

use std::collections::VecDeque;

use super::record::{RecordBuffer, RecordHandler, RecordStatus};

/// First byte of a record that ends the current output block.
pub const SENTINEL: char = '-';

/// Turns a job's stdout into discrete output blocks.
///
/// Every non-empty record that does not start with [`SENTINEL`] is queued
/// (with the configured prefix prepended). A sentinel record is never
/// queued; it makes [`OutputChannel::feed`] return
/// [`RecordStatus::Boundary`] so the owner can drain the finished block.
#[derive(Debug, Default, Clone)]
pub struct OutputChannel {
    buffer: RecordBuffer,
    queue: Queue,
}

#[derive(Debug, Default, Clone)]
struct Queue {
    prefix: Option<String>,
    lines: VecDeque<String>,
}

impl RecordHandler for Queue {
    fn on_record(&mut self, record: &str) -> RecordStatus {
        if record.is_empty() {
            return RecordStatus::Continue;
        }
        if record.starts_with(SENTINEL) {
            return RecordStatus::Boundary;
        }

        let line = match &self.prefix {
            Some(prefix) => format!("{prefix}{record}"),
            None => record.to_string(),
        };
        self.lines.push_back(line);
        RecordStatus::Continue
    }
}

impl OutputChannel {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            buffer: RecordBuffer::new(),
            queue: Queue {
                prefix,
                lines: VecDeque::new(),
            },
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.queue.prefix.as_deref()
    }

    pub fn set_prefix(&mut self, prefix: Option<String>) {
        self.queue.prefix = prefix;
    }

    /// Feed raw stdout bytes. Returns `Boundary` when a sentinel record was
    /// seen; call again with an empty slice after draining to continue with
    /// whatever was buffered behind the sentinel.
    pub fn feed(&mut self, bytes: &[u8]) -> RecordStatus {
        self.buffer.feed(bytes, &mut self.queue)
    }

    /// Process complete records still buffered (e.g. after the pipe closed).
    pub fn flush(&mut self) -> RecordStatus {
        self.buffer.flush(&mut self.queue)
    }

    /// Pop the oldest queued line.
    pub fn dequeue_line(&mut self) -> Option<String> {
        self.queue.lines.pop_front()
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lines.len()
    }

    /// Discard all queued lines, returning how many were dropped.
    pub fn flush_queue(&mut self) -> usize {
        let dropped = self.queue.lines.len();
        self.queue.lines.clear();
        dropped
    }

    /// Bytes of an unterminated record still buffered.
    pub fn partial_len(&self) -> usize {
        self.buffer.pending_len()
    }

    /// Forget queued lines and buffered bytes. Returns `(lines, bytes)`
    /// that were discarded.
    pub fn reset(&mut self) -> (usize, usize) {
        let bytes = self.buffer.pending_len();
        self.buffer.clear();
        (self.flush_queue(), bytes)
    }
}
