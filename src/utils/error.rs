//! Error types for ingestion operations.
//!
//! [`IngestError`] is the single error type threaded through the crate. Callers
//! that need to decide *what to do* with a failure (retry, split, disable a
//! mode, skip an item) ask for its [`FaultKind`] instead of matching variants.

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_request::RpcError;
use thiserror::Error;

/// Custom error type for ingestion operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Errors encountered during database operations.
    ///
    /// Wraps `sqlx::Error` through `#[from]` so store code can use `?` directly.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// A raw transaction could not be turned into a normalized record.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Errors interacting with the Solana RPC that carry no status or code.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// The upstream answered with a non-success HTTP status.
    #[error("HTTP {status}: {context}")]
    HttpStatus { status: u16, context: String },

    /// A JSON-RPC error object returned by the node.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },

    /// A request or handshake exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Errors from the Solana RPC client.
    #[error("RPC client error: {0}")]
    RpcClientError(Box<ClientError>),

    /// The upstream rejected a request because the response would be too large (HTTP 413).
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The push endpoint does not support the requested subscription filter.
    #[error("Unsupported subscription filter: {0}")]
    UnsupportedFilter(String),

    /// Connection error (WebSocket handshake, dropped socket, refused TCP connect).
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Errors related to configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Errors during Solana public key parsing.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] solana_sdk::pubkey::ParsePubkeyError),

    /// JSON (de)serialization failures outside the decoding path.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Catch-all for failures that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Type alias for Results using `IngestError`.
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<ClientError> for IngestError {
    fn from(err: ClientError) -> Self {
        IngestError::RpcClientError(Box::new(err))
    }
}

/// Coarse classification of a failure, used by retry policies and loop-level handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Upstream throttling (HTTP 429).
    RateLimited,
    /// Request or connection timed out.
    Timeout,
    /// Upstream 5xx.
    ServerError,
    /// Transport-level failure: refused, reset, dropped socket.
    Connection,
    /// Response too large for the upstream to serve (HTTP 413).
    PayloadTooLarge,
    /// Requested feature not supported by the upstream.
    Unsupported,
    /// Malformed upstream data.
    Decoding,
    /// Persistence failure.
    Storage,
    /// Invalid configuration.
    Config,
    Other,
}

impl FaultKind {
    /// Whether this kind of failure is expected to clear up on its own.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FaultKind::RateLimited
                | FaultKind::Timeout
                | FaultKind::ServerError
                | FaultKind::Connection
        )
    }
}

/// JSON-RPC codes Solana nodes return for conditions that clear up on their own.
const NODE_UNHEALTHY: i64 = -32005;
const BLOCK_NOT_AVAILABLE: i64 = -32004;
const INTERNAL_ERROR: i64 = -32603;
/// Rate-limit code used by several hosted RPC providers.
const PROVIDER_RATE_LIMITED: i64 = -32429;

impl IngestError {
    /// Classifies this error.
    ///
    /// Only structured data is inspected: HTTP status codes, JSON-RPC error
    /// codes and the RPC client's own error kinds. Messages are never parsed,
    /// so slot numbers or signatures in them can't change the outcome.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            IngestError::DatabaseError(_) => FaultKind::Storage,
            IngestError::DecodingError(_) | IngestError::SerializationError(_) => {
                FaultKind::Decoding
            }
            IngestError::RpcError(_) | IngestError::InternalError(_) => FaultKind::Other,
            IngestError::HttpStatus { status, .. } => classify_status(*status),
            IngestError::JsonRpc { code, .. } => classify_rpc_code(*code),
            IngestError::Timeout(_) => FaultKind::Timeout,
            IngestError::RpcClientError(err) => classify_client_error(err),
            IngestError::PayloadTooLarge(_) => FaultKind::PayloadTooLarge,
            IngestError::UnsupportedFilter(_) => FaultKind::Unsupported,
            IngestError::ConnectionError(_) => FaultKind::Connection,
            IngestError::ConfigError(_)
            | IngestError::EnvVarError(_)
            | IngestError::InvalidPublicKey(_) => FaultKind::Config,
        }
    }

    /// Shorthand for `self.kind().is_transient()`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Maps an HTTP status code to a [`FaultKind`].
#[must_use]
pub fn classify_status(status: u16) -> FaultKind {
    match status {
        413 => FaultKind::PayloadTooLarge,
        429 => FaultKind::RateLimited,
        408 | 504 => FaultKind::Timeout,
        500..=599 => FaultKind::ServerError,
        _ => FaultKind::Other,
    }
}

/// Maps a JSON-RPC error code to a [`FaultKind`].
#[must_use]
pub fn classify_rpc_code(code: i64) -> FaultKind {
    match code {
        PROVIDER_RATE_LIMITED => FaultKind::RateLimited,
        NODE_UNHEALTHY | BLOCK_NOT_AVAILABLE | INTERNAL_ERROR => FaultKind::ServerError,
        _ => FaultKind::Other,
    }
}

fn classify_client_error(err: &ClientError) -> FaultKind {
    match err.kind() {
        ClientErrorKind::Io(_) => FaultKind::Connection,
        ClientErrorKind::Reqwest(e) if e.is_timeout() => FaultKind::Timeout,
        ClientErrorKind::Reqwest(e) => match e.status() {
            Some(status) => classify_status(status.as_u16()),
            None => FaultKind::Connection,
        },
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => {
            classify_rpc_code(*code)
        }
        ClientErrorKind::SerdeJson(_) => FaultKind::Decoding,
        _ => FaultKind::Other,
    }
}
