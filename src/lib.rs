//! `solana-ingestor` - dual-mode ingestion of Solana program transactions.
//!
//! For every configured program the ingestor runs up to two independent
//! workers that feed the same store:
//!
//! - a **historical walker** that pages backward through the program's
//!   signature history with an adaptive page size, splitting detail requests
//!   the upstream rejects as too large;
//! - a **realtime subscriber** that reacts to `logsSubscribe` notifications
//!   and disables itself for good if the endpoint can't filter by mention.
//!
//! Both reduce transactions to [`NormalizedRecord`]s holding only the target
//! program's instructions. The store is keyed on `(program_id, signature)`, so
//! overlapping writes from the two modes are absorbed rather than duplicated.
//!
//! # Quick Start
//!
//! ```no_run
//! use solana_ingestor::{
//!     IngestConfig, Orchestrator, PgStore, RecordStore, DefaultRpcProvider, WebSocketSubscriber,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> solana_ingestor::Result<()> {
//! let config = IngestConfig::from_env()?;
//! let settings = config.settings();
//!
//! let store = Arc::new(PgStore::connect(&config.database_url).await?);
//! store.initialize().await?;
//!
//! let rpc = Arc::new(DefaultRpcProvider::new(
//!     &config.rpc_url,
//!     settings.commitment,
//!     config.request_timeout(),
//! )?);
//! let push = Arc::new(WebSocketSubscriber::new(&config.ws_url, settings.commitment));
//!
//! let mut orchestrator = Orchestrator::new(settings, rpc, store.clone(), push);
//! orchestrator.start_all(&config.programs);
//!
//! tokio::signal::ctrl_c().await.ok();
//! orchestrator.stop_all();
//! store.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Public API exports
pub use config::{CommitmentLevel, IngestConfig, IngestConfigBuilder, IngestSettings};
pub use crate::core::historical::{AdaptiveBatch, BatchReport, HistoricalWalker, WalkerPhase};
pub use crate::core::normalizer::normalize;
pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::realtime::{NotificationOutcome, RealtimePhase, RealtimeSubscriber};
pub use storage::{MemoryStore, PgStore, RecordStore};
pub use streams::{LogNotification, LogSubscriber, Subscription, WebSocketSubscriber};
pub use types::program::ProgramTarget;
pub use types::records::{
    NormalizedInstruction, NormalizedRecord, RawTransaction, SignatureInfo, SourceMode,
};
pub use types::traits::Indexer;
pub use utils::error::{FaultKind, IngestError, Result};
pub use utils::retry::{with_retry, RetryMatcher, RetryPolicy};
pub use utils::rpc::{DefaultRpcProvider, RpcProvider};

// Module declarations
pub mod config;
pub mod core;
pub mod storage;
pub mod streams;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod types;
pub mod utils;
