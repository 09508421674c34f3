use super::config::{LogFormat, TelemetryConfig};
use std::sync::OnceLock;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs the global subscriber on first call; later calls change nothing.
///
/// `RUST_LOG` wins over `config.log_filter`. Returns whether this process's
/// subscriber is ours, `false` when another one was registered first.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let spans = if config.span_close_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer().with_ansi(config.ansi).with_span_events(spans);

        let registry = tracing_subscriber::registry().with(filter);
        let installed = match config.format {
            LogFormat::Full => registry.with(layer).try_init(),
            LogFormat::Compact => registry.with(layer.compact()).try_init(),
        }
        .is_ok();

        if installed {
            tracing::debug!(filter = %config.log_filter, format = ?config.format, "Log output ready");
        }
        installed
    })
}
