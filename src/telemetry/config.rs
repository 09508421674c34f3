use std::str::FromStr;

/// Line layout of the console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-field lines with span context.
    #[default]
    Full,
    /// One short line per event, for busy ingestors.
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// How the global subscriber renders ingestion events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Directives used when `RUST_LOG` is unset, e.g. `solana_ingestor=debug,sqlx=warn`.
    pub log_filter: String,
    pub format: LogFormat,
    pub ansi: bool,
    /// Emit an event when an instrumented worker span (`backfill`, `realtime`) closes.
    pub span_close_events: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,sqlx=warn".into(),
            format: LogFormat::Full,
            ansi: true,
            span_close_events: false,
        }
    }
}

impl TelemetryConfig {
    /// Reads `LOG_FILTER`, `LOG_FORMAT` and `NO_COLOR` on top of the defaults.
    ///
    /// An unknown `LOG_FORMAT` keeps the default layout.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.log_filter = filter;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|f| f.parse().ok()) {
            config.format = format;
        }
        config.ansi = std::env::var_os("NO_COLOR").is_none();
        config
    }
}
