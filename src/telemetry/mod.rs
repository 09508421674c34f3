//! Process-wide log output for the ingestor binary and embedding applications.
//!
//! Library code only emits `tracing` events; nothing is printed until a
//! subscriber is installed with [`init_telemetry`].

mod config;
mod subscriber;

pub use config::{LogFormat, TelemetryConfig};
pub use subscriber::init_telemetry;
