//! Configuration management for the ingestor.
//!
//! Configuration is assembled once, either through [`IngestConfigBuilder`] or
//! [`IngestConfig::from_env`], validated, and then frozen. Workers receive the
//! shared [`IngestSettings`] behind an `Arc`; nothing reads configuration from
//! global state after startup.

use crate::types::program::{parse_programs, ProgramTarget};
use crate::utils::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
const DEFAULT_PROGRAMS_FILE: &str = "programs.json";

/// Upper bound on the history page size accepted by Solana RPC nodes.
pub const MAX_SIGNATURE_PAGE: usize = 1000;

/// Transaction commitment level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl CommitmentLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        }
    }
}

impl FromStr for CommitmentLevel {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(CommitmentLevel::Processed),
            "confirmed" => Ok(CommitmentLevel::Confirmed),
            "finalized" => Ok(CommitmentLevel::Finalized),
            other => Err(IngestError::ConfigError(format!(
                "unknown commitment level '{other}'"
            ))),
        }
    }
}

impl From<CommitmentLevel> for CommitmentConfig {
    fn from(level: CommitmentLevel) -> Self {
        match level {
            CommitmentLevel::Processed => CommitmentConfig::processed(),
            CommitmentLevel::Confirmed => CommitmentConfig::confirmed(),
            CommitmentLevel::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// Retry policy parameters for upstream calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call (default: 5).
    pub max_attempts: u32,
    /// Delay after the first failure in milliseconds (default: 1000).
    pub initial_delay_ms: u64,
    /// Ceiling for any single delay in milliseconds (default: 30000).
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failure (default: 2.0).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

/// Historical walker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalConfig {
    /// Page size for the first iteration (default: 100).
    pub initial_batch_size: usize,
    /// Floor the adaptive page size never shrinks below (default: 10).
    pub min_batch_size: usize,
    /// Ceiling the adaptive page size never grows above (default: 1000).
    pub max_batch_size: usize,
    /// Pause between iterations in milliseconds (default: 1000).
    pub poll_interval_ms: u64,
    /// Frontier pause as a multiple of the poll interval (default: 5).
    pub frontier_wait_multiplier: u32,
    /// Pause after a failed iteration in milliseconds (default: 5000).
    pub error_cooldown_ms: u64,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 100,
            min_batch_size: 10,
            max_batch_size: 1000,
            poll_interval_ms: 1000,
            frontier_wait_multiplier: 5,
            error_cooldown_ms: 5000,
        }
    }
}

impl HistoricalConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn frontier_wait(&self) -> Duration {
        self.poll_interval() * self.frontier_wait_multiplier
    }

    #[must_use]
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }
}

/// Realtime subscriber tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Pause before re-establishing a failed subscription in milliseconds (default: 5000).
    pub reconnect_delay_ms: u64,
    /// Maximum notifications processed concurrently per program (default: 16).
    pub max_in_flight_notifications: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5000,
            max_in_flight_notifications: 16,
        }
    }
}

impl RealtimeConfig {
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Immutable runtime settings shared by every worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSettings {
    pub commitment: CommitmentLevel,
    pub historical: HistoricalConfig,
    pub realtime: RealtimeConfig,
    pub retry: RetryConfig,
}

/// Full process configuration.
///
/// Use [`IngestConfigBuilder`] or [`IngestConfig::from_env`] to construct it.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Database connection URL, or `memory://` for the in-process store.
    pub database_url: String,
    /// JSON-RPC HTTP endpoint.
    pub rpc_url: String,
    /// Push endpoint (ws:// or wss://).
    pub ws_url: String,
    /// Per-request transport timeout in seconds (default: 30).
    pub request_timeout_secs: u64,
    /// Programs to ingest.
    pub programs: Vec<ProgramTarget>,
    settings: Arc<IngestSettings>,
}

impl IngestConfig {
    /// Loads configuration from the environment, reading a `.env` file first if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `DATABASE_URL` is missing, a value fails to parse,
    /// the programs file can't be read, or validation fails.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| IngestError::ConfigError("DATABASE_URL must be set".into()))?;
        let rpc_url = env_or("RPC_URL", DEFAULT_RPC_URL.to_string())?;
        let programs_file = env_or("PROGRAMS_FILE", DEFAULT_PROGRAMS_FILE.to_string())?;

        let defaults = IngestSettings::default();
        let historical = HistoricalConfig {
            initial_batch_size: env_or("BATCH_SIZE", defaults.historical.initial_batch_size)?,
            min_batch_size: env_or("MIN_BATCH_SIZE", defaults.historical.min_batch_size)?,
            max_batch_size: env_or("MAX_BATCH_SIZE", defaults.historical.max_batch_size)?,
            poll_interval_ms: env_or("POLL_INTERVAL_MS", defaults.historical.poll_interval_ms)?,
            frontier_wait_multiplier: env_or(
                "FRONTIER_WAIT_MULTIPLIER",
                defaults.historical.frontier_wait_multiplier,
            )?,
            error_cooldown_ms: env_or("ERROR_COOLDOWN_MS", defaults.historical.error_cooldown_ms)?,
        };
        let realtime = RealtimeConfig {
            reconnect_delay_ms: env_or(
                "WS_RECONNECT_DELAY_MS",
                defaults.realtime.reconnect_delay_ms,
            )?,
            max_in_flight_notifications: env_or(
                "MAX_IN_FLIGHT_NOTIFICATIONS",
                defaults.realtime.max_in_flight_notifications,
            )?,
        };
        let retry = RetryConfig {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_delay_ms: env_or("RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay_ms)?,
            max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms)?,
            backoff_factor: env_or("RETRY_BACKOFF_FACTOR", defaults.retry.backoff_factor)?,
        };

        let mut builder = IngestConfigBuilder::new()
            .with_database(database_url)
            .with_rpc(rpc_url)
            .with_commitment(env_or("COMMITMENT", CommitmentLevel::default())?)
            .with_historical(historical)
            .with_realtime(realtime)
            .with_retry(retry)
            .with_request_timeout_secs(env_or("REQUEST_TIMEOUT_SECS", 30u64)?)
            .programs_from_file(programs_file)?;

        if let Ok(ws_url) = std::env::var("WS_URL") {
            builder = builder.with_ws(ws_url);
        }

        builder.build()
    }

    /// Shared, immutable worker settings.
    #[must_use]
    pub fn settings(&self) -> Arc<IngestSettings> {
        Arc::clone(&self.settings)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    database_url: Option<String>,
    rpc_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_secs: Option<u64>,
    programs: Vec<ProgramTarget>,
    settings: IngestSettings,
}

impl IngestConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_database(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_rpc(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// Sets the push endpoint explicitly instead of deriving it from the RPC URL.
    #[must_use]
    pub fn with_ws(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_commitment(mut self, commitment: CommitmentLevel) -> Self {
        self.settings.commitment = commitment;
        self
    }

    #[must_use]
    pub fn with_historical(mut self, historical: HistoricalConfig) -> Self {
        self.settings.historical = historical;
        self
    }

    #[must_use]
    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.settings.realtime = realtime;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.settings.retry = retry;
        self
    }

    /// Adds one program to ingest.
    #[must_use]
    pub fn program(mut self, target: ProgramTarget) -> Self {
        self.programs.push(target);
        self
    }

    /// Adds every program listed in a JSON programs file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file can't be read, or the parse error for bad contents.
    pub fn programs_from_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            IngestError::ConfigError(format!("cannot read programs file {}: {e}", path.display()))
        })?;
        self.programs.extend(parse_programs(&json)?);
        Ok(self)
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid setting.
    pub fn build(self) -> Result<IngestConfig> {
        let database_url = self
            .database_url
            .ok_or_else(|| IngestError::ConfigError("database URL is required".into()))?;
        let rpc_url = self.rpc_url.unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let ws_url = match self.ws_url {
            Some(url) => url,
            None => derive_ws_url(&rpc_url)?,
        };

        validate_programs(&self.programs)?;
        validate_settings(&self.settings)?;

        Ok(IngestConfig {
            database_url,
            rpc_url,
            ws_url,
            request_timeout_secs: self.request_timeout_secs.unwrap_or(30),
            programs: self.programs,
            settings: Arc::new(self.settings),
        })
    }
}

/// Derives the push endpoint from an RPC URL the way Solana nodes lay them out:
/// `http` becomes `ws`, `https` becomes `wss`, and an explicit port moves up by one.
///
/// # Errors
///
/// Returns `ConfigError` for URLs without a recognised scheme.
pub fn derive_ws_url(rpc_url: &str) -> Result<String> {
    let (scheme, rest) = rpc_url
        .split_once("://")
        .ok_or_else(|| IngestError::ConfigError(format!("RPC URL has no scheme: {rpc_url}")))?;

    let ws_scheme = match scheme {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(rpc_url.to_string()),
        other => {
            return Err(IngestError::ConfigError(format!(
                "unsupported RPC URL scheme '{other}'"
            )))
        }
    };

    let split_at = rest.find(|c| c == '/' || c == '?').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split_at);

    let authority = match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() => {
            let port: u16 = port
                .parse()
                .map_err(|_| IngestError::ConfigError(format!("invalid port in {rpc_url}")))?;
            let ws_port = port
                .checked_add(1)
                .ok_or_else(|| IngestError::ConfigError(format!("port overflow in {rpc_url}")))?;
            format!("{host}:{ws_port}")
        }
        _ => authority.to_string(),
    };

    Ok(format!("{ws_scheme}://{authority}{tail}"))
}

fn validate_programs(programs: &[ProgramTarget]) -> Result<()> {
    if programs.is_empty() {
        return Err(IngestError::ConfigError(
            "at least one program must be configured".into(),
        ));
    }

    let mut seen = HashSet::new();
    for program in programs {
        if !program.realtime && !program.historical {
            return Err(IngestError::ConfigError(format!(
                "program '{}' enables neither realtime nor historical mode",
                program.name
            )));
        }
        if !seen.insert(program.address) {
            return Err(IngestError::ConfigError(format!(
                "program {} is configured more than once",
                program.address
            )));
        }
    }
    Ok(())
}

fn validate_settings(settings: &IngestSettings) -> Result<()> {
    let h = &settings.historical;
    if !(1 <= h.min_batch_size
        && h.min_batch_size <= h.initial_batch_size
        && h.initial_batch_size <= h.max_batch_size
        && h.max_batch_size <= MAX_SIGNATURE_PAGE)
    {
        return Err(IngestError::ConfigError(format!(
            "batch sizes must satisfy 1 <= min ({}) <= initial ({}) <= max ({}) <= {MAX_SIGNATURE_PAGE}",
            h.min_batch_size, h.initial_batch_size, h.max_batch_size
        )));
    }
    if h.frontier_wait_multiplier < 1 {
        return Err(IngestError::ConfigError(
            "frontier wait multiplier must be at least 1".into(),
        ));
    }
    if settings.realtime.max_in_flight_notifications == 0 {
        return Err(IngestError::ConfigError(
            "max in-flight notifications must be at least 1".into(),
        ));
    }
    if settings.retry.max_attempts < 1 {
        return Err(IngestError::ConfigError(
            "retry max attempts must be at least 1".into(),
        ));
    }
    if settings.retry.backoff_factor <= 1.0 {
        return Err(IngestError::ConfigError(
            "retry backoff factor must be greater than 1".into(),
        ));
    }
    Ok(())
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IngestError::ConfigError(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}
