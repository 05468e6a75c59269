//! Structured logging for the regwatch binaries.
//!
//! Library code only emits `tracing` events; binaries call [`init_tracing`]
//! once at startup.
//!
//! ```no_run
//! use regwatch_host::observability::{TracingConfig, init_tracing};
//!
//! init_tracing(&TracingConfig::from_env()).unwrap();
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::init_tracing;
