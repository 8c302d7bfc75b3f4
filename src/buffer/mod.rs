// src/buffer/mod.rs

//! Record buffering for child process pipes.
//!
//! - [`record`] splits a byte stream into newline-delimited records.
//! - [`output`] groups stdout records into sentinel-terminated blocks.
//! - [`stderr`] forwards stderr records to the log.

pub mod output;
pub mod record;
pub mod stderr;

pub use output::{OutputChannel, SENTINEL};
pub use record::{RecordBuffer, RecordHandler, RecordStatus};
pub use stderr::ErrorChannel;
