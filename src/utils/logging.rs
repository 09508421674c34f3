//! Logging helpers layered over `tracing`.
//!
//! Setting `SOLANA_INGESTOR_SILENT` mutes the informational helpers (startup
//! banner, batch summaries); warnings and errors are always emitted.

fn silent() -> bool {
    std::env::var("SOLANA_INGESTOR_SILENT").is_ok()
}

/// Replaces the value of any `api-key=` query parameter with `[REDACTED]`.
#[must_use]
pub fn redact_url(url: &str) -> String {
    const MARKER: &str = "api-key=";

    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(pos) = rest.find(MARKER) {
        let value_start = pos + MARKER.len();
        out.push_str(&rest[..value_start]);
        out.push_str("[REDACTED]");
        let after = &rest[value_start..];
        let value_end = after.find('&').unwrap_or(after.len());
        rest = &after[value_end..];
    }
    out.push_str(rest);
    out
}

/// Logs process startup information with credentials scrubbed from URLs.
pub fn log_startup(rpc_url: &str, ws_url: &str, programs: usize) {
    if silent() {
        return;
    }

    tracing::info!(
        rpc_url = %redact_url(rpc_url),
        ws_url = %redact_url(ws_url),
        programs,
        "Solana ingestor startup"
    );
}

/// Logs a persisted batch.
pub fn log_batch(program: &str, fetched: usize, inserted: u64, duration_ms: u64) {
    if silent() {
        return;
    }
    if fetched > 0 {
        tracing::info!(
            program,
            fetched,
            inserted,
            duration_ms,
            "Batch persisted"
        );
    }
}

/// Logs an error with context.
pub fn log_error(context: &str, error: &str) {
    tracing::error!(context, error, "Ingestor error");
}
