//! Lifecycle contract shared by the ingestion modes.

use crate::types::program::ProgramTarget;
use crate::types::records::SourceMode;
use crate::utils::error::Result;
use async_trait::async_trait;

/// A background ingestion worker bound to one program.
///
/// Implementors own their state outright; the contract is only the capability
/// to be started and stopped.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Begins background work and returns once it has been initiated.
    ///
    /// Calling `start` on a worker that is already running is a no-op.
    async fn start(&self) -> Result<()>;

    /// Requests cooperative termination. Does not block and is idempotent.
    fn stop(&self);

    /// Whether background work is currently active.
    fn is_running(&self) -> bool;

    /// The mode this worker ingests under.
    fn mode(&self) -> SourceMode;

    /// The program this worker is bound to.
    fn program(&self) -> &ProgramTarget;
}
