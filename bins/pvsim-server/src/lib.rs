//! Shared command-line plumbing for the pvsim binaries.

pub mod logging;

pub use logging::{init_logging, LogLevel};
