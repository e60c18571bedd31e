//! Storage infrastructure: the service configuration file.
//!
//! The `config` sub-module reads `config.toml` from the platform config
//! directory, falls back to defaults on first run, and turns the `[control]`
//! section into the record published on the control segment.

pub mod config;
