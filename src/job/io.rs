// src/job/io.rs

//! Pipe pumping and output block delivery.

use tracing::{debug, warn};

use crate::buffer::RecordStatus;
use crate::host::{PipeId, PipeRead};

use super::{Job, JobContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Job {
    /// One of this job's pipes became readable.
    ///
    /// Reads at most `max_reads_per_event` chunks before returning, so a
    /// chatty child cannot starve the rest of the event loop.
    pub fn on_pipe_readable(&mut self, pipe: PipeId, cx: &mut JobContext<'_>) {
        let stream = if self.stdout == Some(pipe) {
            Stream::Stdout
        } else if self.stderr == Some(pipe) {
            Stream::Stderr
        } else {
            debug!(job = %self.name, %pipe, "readable event for a pipe we no longer own");
            return;
        };
        self.pump(stream, self.limits.max_reads_per_event, cx);
    }

    /// Pop every queued line into the sink, followed by the end-of-block
    /// marker (`None`).
    pub(super) fn drain_output_block(&mut self, cx: &mut JobContext<'_>) {
        let expected = self.output.queue_size();
        let mut delivered = 0usize;

        while let Some(line) = self.output.dequeue_line() {
            cx.sink.on_output_line(&self.name, Some(&line));
            delivered += 1;
        }
        cx.sink.on_output_line(&self.name, None);
        self.num_output_blocks += 1;

        if delivered != expected {
            warn!(
                job = %self.name,
                expected,
                delivered,
                "output queue size did not match lines drained"
            );
        }
        debug!(
            job = %self.name,
            lines = delivered,
            blocks = self.num_output_blocks,
            "output block complete"
        );
    }

    /// The process is gone: read whatever is left, flush both channels and
    /// release the pipes.
    pub(super) fn drain_after_exit(&mut self, cx: &mut JobContext<'_>) {
        let limit = self.limits.max_drain_reads;
        self.pump(Stream::Stdout, limit, cx);
        self.pump(Stream::Stderr, limit, cx);

        self.consume_stdout(&[], cx);
        let partial = self.output.partial_len();
        if partial > 0 {
            debug!(job = %self.name, bytes = partial, "stdout ended without a newline");
        }
        self.errors.flush();

        self.close_pipes(cx);
    }

    pub(super) fn close_pipes(&mut self, cx: &mut JobContext<'_>) {
        for pipe in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            cx.reactor.close_pipe(pipe);
        }
    }

    fn pump(&mut self, stream: Stream, max_reads: usize, cx: &mut JobContext<'_>) {
        let pipe = match stream {
            Stream::Stdout => self.stdout,
            Stream::Stderr => self.stderr,
        };
        let Some(pipe) = pipe else {
            return;
        };

        let mut buf = vec![0u8; self.limits.read_chunk_size.max(1)];
        for _ in 0..max_reads {
            match cx.reactor.read_pipe(pipe, &mut buf) {
                PipeRead::Data(0) | PipeRead::WouldBlock => break,
                PipeRead::Data(n) => match stream {
                    Stream::Stdout => self.consume_stdout(&buf[..n], cx),
                    Stream::Stderr => self.errors.feed(&buf[..n]),
                },
                PipeRead::Eof => {
                    debug!(job = %self.name, %pipe, ?stream, "pipe closed by child");
                    self.close_stream(stream, cx);
                    break;
                }
                PipeRead::Error(e) => {
                    warn!(job = %self.name, %pipe, ?stream, error = %e, "pipe read failed; closing");
                    self.close_stream(stream, cx);
                    break;
                }
            }
        }
    }

    fn consume_stdout(&mut self, bytes: &[u8], cx: &mut JobContext<'_>) {
        let mut status = self.output.feed(bytes);
        while status == RecordStatus::Boundary {
            self.drain_output_block(cx);
            status = self.output.flush();
        }
    }

    fn close_stream(&mut self, stream: Stream, cx: &mut JobContext<'_>) {
        let pipe = match stream {
            Stream::Stdout => self.stdout.take(),
            Stream::Stderr => self.stderr.take(),
        };
        if let Some(pipe) = pipe {
            cx.reactor.close_pipe(pipe);
        }
    }
}
