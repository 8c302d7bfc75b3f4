// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::host::HostError;
use crate::job::JobError;

#[derive(Error, Debug)]
pub enum CronvisorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CronvisorError>;
