// src/buffer/record.rs

//! Byte accumulator that splits a pipe stream into newline-delimited records.

use tracing::trace;

/// Record delimiter.
pub const DELIMITER: u8 = b'\n';

/// Escape byte: the byte following it is never treated as a delimiter.
pub const ESCAPE: u8 = b'\\';

/// What a record handler wants the buffer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Keep consuming records.
    Continue,
    /// Stop consuming; the owner has something to act on (e.g. the end of
    /// an output block). Remaining bytes stay buffered.
    Boundary,
}

/// Hook invoked once per complete record.
pub trait RecordHandler {
    fn on_record(&mut self, record: &str) -> RecordStatus;
}

impl<F> RecordHandler for F
where
    F: FnMut(&str) -> RecordStatus,
{
    fn on_record(&mut self, record: &str) -> RecordStatus {
        self(record)
    }
}

/// Accumulates raw bytes and hands complete records to a [`RecordHandler`].
///
/// A record is surfaced only once its delimiter has been seen, so any split
/// of the input across `feed` calls yields the same records as feeding the
/// concatenation in one call.
#[derive(Debug, Default, Clone)]
pub struct RecordBuffer {
    pending: Vec<u8>,
    /// Offset into `pending` of the first byte not yet handed out.
    start: usize,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and consume as many complete records as are buffered.
    ///
    /// Stops at the first record for which the handler returns
    /// [`RecordStatus::Boundary`] and returns that status; the rest of the
    /// buffered bytes are processed by the next `feed` (an empty slice is
    /// fine for that).
    pub fn feed<H>(&mut self, bytes: &[u8], handler: &mut H) -> RecordStatus
    where
        H: RecordHandler + ?Sized,
    {
        self.pending.extend_from_slice(bytes);
        self.consume(handler)
    }

    /// Process complete records that are still buffered without adding
    /// input. A non-terminated tail is left alone.
    pub fn flush<H>(&mut self, handler: &mut H) -> RecordStatus
    where
        H: RecordHandler + ?Sized,
    {
        self.consume(handler)
    }

    /// Bytes buffered but not yet surfaced as a record.
    pub fn pending_len(&self) -> usize {
        self.pending.len() - self.start
    }

    /// True if buffered bytes still contain at least one complete record.
    pub fn has_complete_record(&self) -> bool {
        find_delimiter(&self.pending[self.start..]).is_some()
    }

    /// Remove and return the non-terminated tail, if any.
    ///
    /// Only meaningful once no complete record remains buffered.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending_len() == 0 {
            self.clear();
            return None;
        }
        let tail = String::from_utf8_lossy(&self.pending[self.start..]).into_owned();
        self.clear();
        Some(tail)
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.start = 0;
    }

    fn consume<H>(&mut self, handler: &mut H) -> RecordStatus
    where
        H: RecordHandler + ?Sized,
    {
        let mut status = RecordStatus::Continue;

        while let Some(rel) = find_delimiter(&self.pending[self.start..]) {
            let end = self.start + rel;
            let record = String::from_utf8_lossy(&self.pending[self.start..end]).into_owned();
            self.start = end + 1;

            trace!(len = record.len(), "record complete");
            status = handler.on_record(&record);
            if status == RecordStatus::Boundary {
                break;
            }
        }

        self.compact();
        status
    }

    fn compact(&mut self) {
        if self.start == self.pending.len() {
            self.clear();
        } else if self.start > 0 {
            self.pending.drain(..self.start);
            self.start = 0;
        }
    }
}

/// Position of the first unescaped delimiter in `bytes`.
fn find_delimiter(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            ESCAPE => i += 2,
            DELIMITER => return Some(i),
            _ => i += 1,
        }
    }
    None
}
