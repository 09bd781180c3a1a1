//! Logging and trace export setup shared by Conductor binaries.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, LogOptions, init_tracing, shutdown_tracing};
