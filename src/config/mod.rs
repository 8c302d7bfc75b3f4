// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs` is the TOML-backed data model.
//! - `loader.rs` reads a config file from disk.
//! - `validate.rs` turns the raw model into job descriptors and
//!   supervisor options.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{ConfigFile, DurationValue, JobConfig, RawConfigFile, SupervisorSection};
pub use validate::parse_duration;
