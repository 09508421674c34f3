//! Backward walk through a program's transaction history.
//!
//! The walker pages signatures from newest to oldest, persists the ones the
//! store hasn't seen, and keeps going until the page comes back empty. Then it
//! waits and starts over from the tip, so anything that landed while it was
//! walking (or got skipped by a transient fault) is picked up on the next pass.
//!
//! Page size adapts to upstream health: it doubles after a clean iteration and
//! halves after a failed one, always within the configured bounds. A detail
//! request rejected as too large is split in half until it fits; a single
//! signature that still doesn't fit is logged and skipped.

use crate::config::{HistoricalConfig, IngestSettings};
use crate::core::normalizer::normalize;
use crate::storage::RecordStore;
use crate::types::program::ProgramTarget;
use crate::types::records::{NormalizedRecord, SignatureInfo, SourceMode};
use crate::types::traits::Indexer;
use crate::utils::error::{FaultKind, Result};
use crate::utils::logging;
use crate::utils::retry::{with_retry, RetryPolicy};
use crate::utils::rpc::RpcProvider;
use async_trait::async_trait;
use solana_sdk::signature::Signature;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// Adaptive batch size
// ─────────────────────────────────────────────────────────────────────────────

/// Page size that grows on success and shrinks on failure, clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveBatch {
    size: usize,
    min: usize,
    max: usize,
}

impl AdaptiveBatch {
    #[must_use]
    pub fn new(initial: usize, min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            size: initial.clamp(min, max),
            min,
            max,
        }
    }

    #[must_use]
    pub fn from_config(config: &HistoricalConfig) -> Self {
        Self::new(
            config.initial_batch_size,
            config.min_batch_size,
            config.max_batch_size,
        )
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Doubles the size, up to the ceiling.
    pub fn grow(&mut self) -> usize {
        self.size = self.size.saturating_mul(2).min(self.max);
        self.size
    }

    /// Halves the size, down to the floor.
    pub fn shrink(&mut self) -> usize {
        self.size = (self.size / 2).max(self.min);
        self.size
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch processing
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one batch of unseen signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Transactions returned by the upstream.
    pub fetched: usize,
    /// Records newly written to the store.
    pub inserted: u64,
    /// Signatures the upstream had no transaction for.
    pub not_found: usize,
    /// Transactions that failed to normalize.
    pub failed: usize,
    /// Signatures dropped because even a single-item request was too large.
    pub skipped: Vec<Signature>,
    /// Deepest halving level reached while splitting oversized requests.
    pub max_split_depth: u32,
}

/// Outcome of one loop iteration.
#[derive(Debug)]
enum Step {
    /// Page processed; continue from `cursor`.
    Advanced { cursor: Signature },
    /// Empty page, or the page reached the configured start slot.
    Frontier,
}

/// State shared between the walker handle and its background loop.
struct WalkerCore {
    program: ProgramTarget,
    program_id: String,
    rpc: Arc<dyn RpcProvider>,
    store: Arc<dyn RecordStore>,
    config: HistoricalConfig,
    page_policy: RetryPolicy,
    detail_policy: RetryPolicy,
}

impl WalkerCore {
    async fn resume_point(&self) -> Result<u64> {
        let configured = self.program.configured_start();
        let persisted = self.store.last_indexed_slot(&self.program_id).await?;

        match persisted {
            Some(slot) if slot > configured => {
                tracing::info!(
                    program = %self.program.name,
                    slot,
                    configured,
                    "Resuming backfill from last indexed slot"
                );
                Ok(slot)
            }
            _ => {
                tracing::info!(
                    program = %self.program.name,
                    slot = configured,
                    "Starting backfill fresh from configured slot"
                );
                Ok(configured)
            }
        }
    }

    #[tracing::instrument(name = "backfill", skip_all, fields(program = %self.program.name))]
    async fn run(self: Arc<Self>, token: CancellationToken) {
        let floor = self.program.configured_start();
        let mut cursor: Option<Signature> = None;
        let mut batch = AdaptiveBatch::from_config(&self.config);

        while !token.is_cancelled() {
            match self.step(cursor, batch.size(), floor).await {
                Ok(Step::Advanced { cursor: next }) => {
                    cursor = Some(next);
                    batch.grow();
                }
                Ok(Step::Frontier) => {
                    tracing::debug!(
                        wait_ms = self.config.frontier_wait().as_millis() as u64,
                        "Reached history frontier, rescanning from tip"
                    );
                    if !pause(&token, self.config.frontier_wait()).await {
                        break;
                    }
                    cursor = None;
                    continue;
                }
                Err(e) => {
                    let size = batch.shrink();
                    tracing::warn!(
                        error = %e,
                        transient = e.is_transient(),
                        batch_size = size,
                        cooldown_ms = self.config.error_cooldown_ms,
                        "Backfill iteration failed"
                    );
                    if !pause(&token, self.config.error_cooldown()).await {
                        break;
                    }
                }
            }

            if !pause(&token, self.config.poll_interval()).await {
                break;
            }
        }

        tracing::info!("Backfill stopped");
    }

    async fn step(&self, cursor: Option<Signature>, limit: usize, floor: u64) -> Result<Step> {
        let address = self.program.address;
        let page = with_retry(&self.page_policy, || {
            self.rpc.get_signatures_for_address(&address, cursor, limit)
        })
        .await?;

        let Some(oldest) = page.last().map(|info| info.signature) else {
            return Ok(Step::Frontier);
        };
        let crossed_floor = page.iter().any(|info| info.slot < floor);

        let in_range: Vec<SignatureInfo> = page.into_iter().filter(|info| info.slot >= floor).collect();
        if !in_range.is_empty() {
            let candidates: Vec<String> = in_range.iter().map(|i| i.signature.to_string()).collect();
            let unseen: HashSet<String> = self
                .store
                .filter_unseen_signatures(&self.program_id, &candidates)
                .await?
                .into_iter()
                .collect();

            let todo: Vec<Signature> = in_range
                .iter()
                .filter(|info| unseen.contains(&info.signature.to_string()))
                .map(|info| info.signature)
                .collect();

            if !todo.is_empty() {
                self.process_batch(&todo).await?;
            }
        }

        if crossed_floor {
            Ok(Step::Frontier)
        } else {
            Ok(Step::Advanced { cursor: oldest })
        }
    }

    async fn process_batch(&self, signatures: &[Signature]) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let mut stack: Vec<(Vec<Signature>, u32)> = vec![(signatures.to_vec(), 0)];

        while let Some((mut chunk, depth)) = stack.pop() {
            let fetched = with_retry(&self.detail_policy, || self.rpc.get_transactions(&chunk)).await;

            match fetched {
                Ok(transactions) => {
                    let records = self.normalize_all(&chunk, transactions, &mut report);
                    report.inserted += self.store.upsert_batch(&records).await?;
                }
                Err(e) if e.kind() == FaultKind::PayloadTooLarge => {
                    if chunk.len() == 1 {
                        tracing::warn!(
                            signature = %chunk[0],
                            error = %e,
                            "Transaction too large to fetch, skipping"
                        );
                        report.skipped.push(chunk[0]);
                        continue;
                    }

                    let right = chunk.split_off(chunk.len().div_ceil(2));
                    report.max_split_depth = report.max_split_depth.max(depth + 1);
                    tracing::debug!(
                        left = chunk.len(),
                        right = right.len(),
                        depth = depth + 1,
                        "Payload too large, splitting batch"
                    );
                    stack.push((right, depth + 1));
                    stack.push((chunk, depth + 1));
                }
                Err(e) => return Err(e),
            }
        }

        logging::log_batch(
            &self.program.name,
            report.fetched,
            report.inserted,
            started.elapsed().as_millis() as u64,
        );
        Ok(report)
    }

    fn normalize_all(
        &self,
        chunk: &[Signature],
        transactions: Vec<Option<crate::types::records::RawTransaction>>,
        report: &mut BatchReport,
    ) -> Vec<NormalizedRecord> {
        let mut records = Vec::with_capacity(chunk.len());

        for (signature, tx) in chunk.iter().zip(transactions) {
            let Some(tx) = tx else {
                tracing::warn!(%signature, "Transaction not found upstream, skipping");
                report.not_found += 1;
                continue;
            };
            report.fetched += 1;

            match normalize(
                &signature.to_string(),
                &tx,
                &self.program.address,
                SourceMode::Backfill,
            ) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(%signature, error = %e, "Failed to normalize transaction, skipping");
                    report.failed += 1;
                }
            }
        }
        records
    }
}

/// Sleeps for `duration` unless `token` fires first. Returns `false` when cancelled.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = sleep(duration) => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Walker
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of a [`HistoricalWalker`].
#[derive(Debug, Clone)]
pub enum WalkerPhase {
    Stopped,
    Running {
        token: CancellationToken,
        /// `max(configured start slot, last persisted slot)` at the time of start.
        resume_slot: u64,
    },
}

/// Backfill worker for one program.
pub struct HistoricalWalker {
    core: Arc<WalkerCore>,
    phase: watch::Sender<WalkerPhase>,
}

impl HistoricalWalker {
    pub fn new(
        program: ProgramTarget,
        rpc: Arc<dyn RpcProvider>,
        store: Arc<dyn RecordStore>,
        settings: Arc<IngestSettings>,
    ) -> Self {
        let (phase, _) = watch::channel(WalkerPhase::Stopped);
        Self {
            core: Arc::new(WalkerCore {
                program_id: program.address.to_string(),
                program,
                rpc,
                store,
                config: settings.historical.clone(),
                page_policy: RetryPolicy::any_error(&settings.retry),
                detail_policy: RetryPolicy::transient(&settings.retry),
            }),
            phase,
        }
    }

    /// Resume slot chosen by the current run, `None` while stopped.
    #[must_use]
    pub fn resume_slot(&self) -> Option<u64> {
        match &*self.phase.borrow() {
            WalkerPhase::Running { resume_slot, .. } => Some(*resume_slot),
            WalkerPhase::Stopped => None,
        }
    }

    /// Watches phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WalkerPhase> {
        self.phase.subscribe()
    }

    /// Fetches, normalizes and persists `signatures`, splitting on oversized responses.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or store error that isn't an oversized payload.
    pub async fn process_batch(&self, signatures: &[Signature]) -> Result<BatchReport> {
        self.core.process_batch(signatures).await
    }
}

#[async_trait]
impl Indexer for HistoricalWalker {
    async fn start(&self) -> Result<()> {
        if self.is_running() {
            tracing::debug!(program = %self.core.program.name, "Backfill already running");
            return Ok(());
        }

        let resume_slot = self.core.resume_point().await?;
        let token = CancellationToken::new();

        let started = self.phase.send_if_modified(|phase| match phase {
            WalkerPhase::Stopped => {
                *phase = WalkerPhase::Running {
                    token: token.clone(),
                    resume_slot,
                };
                true
            }
            WalkerPhase::Running { .. } => false,
        });
        if !started {
            return Ok(());
        }

        tokio::spawn(Arc::clone(&self.core).run(token));
        Ok(())
    }

    fn stop(&self) {
        self.phase.send_if_modified(|phase| match phase {
            WalkerPhase::Running { token, .. } => {
                token.cancel();
                *phase = WalkerPhase::Stopped;
                true
            }
            WalkerPhase::Stopped => false,
        });
    }

    fn is_running(&self) -> bool {
        matches!(*self.phase.borrow(), WalkerPhase::Running { .. })
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Backfill
    }

    fn program(&self) -> &ProgramTarget {
        &self.core.program
    }
}

impl Drop for HistoricalWalker {
    fn drop(&mut self) {
        self.stop();
    }
}
