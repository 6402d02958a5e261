//! Lightweight helpers for boost telemetry.
//! Provides subscriber installation, span utilities and counter recorders
//! on top of `tracing` and the `metrics` facade.

use anyhow::Result;

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::{LogFormat, TelemetryConfig};
pub use context::{SessionContext, TelemetryLabels};
pub use crate::metrics::{record_counter, record_gauge, start_session_span, with_common_fields};
pub use tracing_init::init_telemetry;

/// Installs the shared telemetry subscriber configured from `RUST_LOG` and `LOG_FORMAT`.
pub fn install(service_name: &str) -> Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}
