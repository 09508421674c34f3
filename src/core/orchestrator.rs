//! Wiring of per-program workers.
//!
//! The orchestrator creates one [`RealtimeSubscriber`] and/or one
//! [`HistoricalWalker`] per configured program, starts them without waiting,
//! and keeps them in a registry so they can be stopped together.

use crate::config::IngestSettings;
use crate::core::historical::HistoricalWalker;
use crate::core::realtime::RealtimeSubscriber;
use crate::storage::RecordStore;
use crate::streams::LogSubscriber;
use crate::types::program::ProgramTarget;
use crate::types::records::SourceMode;
use crate::types::traits::Indexer;
use crate::utils::logging;
use crate::utils::rpc::RpcProvider;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Owns every worker in the process.
pub struct Orchestrator {
    settings: Arc<IngestSettings>,
    rpc: Arc<dyn RpcProvider>,
    store: Arc<dyn RecordStore>,
    subscriber: Arc<dyn LogSubscriber>,
    indexers: Vec<Arc<dyn Indexer>>,
    /// Cancelled by `stop_all`; a start still in flight at that point is undone.
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<IngestSettings>,
        rpc: Arc<dyn RpcProvider>,
        store: Arc<dyn RecordStore>,
        subscriber: Arc<dyn LogSubscriber>,
    ) -> Self {
        Self {
            settings,
            rpc,
            store,
            subscriber,
            indexers: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates and launches the workers enabled for each program.
    ///
    /// Starts are fire-and-forget: a worker that fails to start is logged and
    /// left in the registry stopped. A program and mode already registered is
    /// not started twice. Returns the number of workers launched.
    pub fn start_all(&mut self, programs: &[ProgramTarget]) -> usize {
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }
        let mut launched = 0;

        for program in programs {
            if program.realtime && !self.is_registered(program, SourceMode::Realtime) {
                let worker = RealtimeSubscriber::new(
                    program.clone(),
                    Arc::clone(&self.rpc),
                    Arc::clone(&self.store),
                    Arc::clone(&self.subscriber),
                    Arc::clone(&self.settings),
                );
                self.launch(Arc::new(worker));
                launched += 1;
            }

            if program.historical && !self.is_registered(program, SourceMode::Backfill) {
                let worker = HistoricalWalker::new(
                    program.clone(),
                    Arc::clone(&self.rpc),
                    Arc::clone(&self.store),
                    Arc::clone(&self.settings),
                );
                self.launch(Arc::new(worker));
                launched += 1;
            }
        }

        tracing::info!(launched, total = self.indexers.len(), "Workers launched");
        launched
    }

    fn launch(&mut self, indexer: Arc<dyn Indexer>) {
        let worker = Arc::clone(&indexer);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match worker.start().await {
                Ok(()) if shutdown.is_cancelled() => worker.stop(),
                Ok(()) => {}
                Err(e) => logging::log_error(
                    &format!("{} {} start", worker.program().name, worker.mode()),
                    &e.to_string(),
                ),
            }
        });
        self.indexers.push(indexer);
    }

    fn is_registered(&self, program: &ProgramTarget, mode: SourceMode) -> bool {
        self.indexers
            .iter()
            .any(|i| i.mode() == mode && i.program().address == program.address)
    }

    /// Requests every registered worker to stop. Does not wait for them.
    pub fn stop_all(&self) {
        self.shutdown.cancel();
        for indexer in &self.indexers {
            indexer.stop();
        }
        tracing::info!(workers = self.indexers.len(), "Stop requested for all workers");
    }

    /// Registered workers, in launch order.
    #[must_use]
    pub fn indexers(&self) -> &[Arc<dyn Indexer>] {
        &self.indexers
    }
}
