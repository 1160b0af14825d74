//! # ShellCache Common
//!
//! Logging configuration shared by the ShellCache crates and the CLI.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
