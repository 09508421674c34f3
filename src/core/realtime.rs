//! Push-driven ingestion of new activity.
//!
//! The subscriber keeps one mention-filtered subscription open per program and
//! turns each notification into a persisted record. Notifications are handled
//! concurrently, bounded by a semaphore, and each one reports a
//! [`NotificationOutcome`] back to the subscription loop.
//!
//! If the push endpoint rejects the mention filter outright the subscriber
//! moves to [`RealtimePhase::Disabled`] for good and the program is covered by
//! backfill alone. Any other failure is retried after the reconnect delay.

use crate::config::{IngestSettings, RealtimeConfig};
use crate::core::normalizer::normalize;
use crate::storage::RecordStore;
use crate::streams::{LogNotification, LogSubscriber, Subscription};
use crate::types::program::ProgramTarget;
use crate::types::records::SourceMode;
use crate::types::traits::Indexer;
use crate::utils::error::{FaultKind, Result};
use crate::utils::retry::{with_retry, RetryPolicy};
use crate::utils::rpc::RpcProvider;
use async_trait::async_trait;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a [`RealtimeSubscriber`].
#[derive(Debug, Clone)]
pub enum RealtimePhase {
    Stopped,
    /// Establishing (or re-establishing) the subscription.
    Subscribing(CancellationToken),
    Active {
        token: CancellationToken,
        subscription_id: u64,
    },
    /// The endpoint doesn't support the mention filter. Terminal.
    Disabled,
}

impl RealtimePhase {
    fn token(&self) -> Option<&CancellationToken> {
        match self {
            RealtimePhase::Subscribing(token) | RealtimePhase::Active { token, .. } => Some(token),
            RealtimePhase::Stopped | RealtimePhase::Disabled => None,
        }
    }
}

/// Result of handling one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Fetched, normalized and written. `inserted` is `false` when another
    /// writer got there first.
    Indexed { slot: u64, inserted: bool },
    /// The store already had this signature.
    AlreadyKnown,
    /// The upstream returned no transaction for the signature.
    NotFound,
}

struct SubscriberCore {
    program: ProgramTarget,
    program_id: String,
    rpc: Arc<dyn RpcProvider>,
    store: Arc<dyn RecordStore>,
    subscriber: Arc<dyn LogSubscriber>,
    config: RealtimeConfig,
    detail_policy: RetryPolicy,
    phase: watch::Sender<RealtimePhase>,
}

impl SubscriberCore {
    /// Moves to `next` unless this run has been stopped in the meantime.
    fn transition(&self, token: &CancellationToken, next: RealtimePhase) {
        self.phase.send_if_modified(|phase| {
            if token.is_cancelled() || matches!(phase, RealtimePhase::Disabled) {
                return false;
            }
            *phase = next;
            true
        });
    }

    async fn handle(&self, notification: &LogNotification) -> Result<NotificationOutcome> {
        let signature = notification.signature.to_string();

        let unseen = self
            .store
            .filter_unseen_signatures(&self.program_id, std::slice::from_ref(&signature))
            .await?;
        if unseen.is_empty() {
            return Ok(NotificationOutcome::AlreadyKnown);
        }

        let fetched = with_retry(&self.detail_policy, || {
            self.rpc.get_transaction(&notification.signature)
        })
        .await?;
        let Some(tx) = fetched else {
            return Ok(NotificationOutcome::NotFound);
        };

        let record = normalize(&signature, &tx, &self.program.address, SourceMode::Realtime)?;
        let slot = record.slot;
        let inserted = self.store.upsert_batch(std::slice::from_ref(&record)).await?;

        Ok(NotificationOutcome::Indexed {
            slot,
            inserted: inserted > 0,
        })
    }

    #[tracing::instrument(name = "realtime", skip_all, fields(program = %self.program.name))]
    async fn run(self: Arc<Self>, token: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight_notifications));
        let mut in_flight: JoinSet<(Signature, Result<NotificationOutcome>)> = JoinSet::new();

        'connect: while !token.is_cancelled() {
            let attempt = tokio::select! {
                () = token.cancelled() => break,
                attempt = self.subscriber.subscribe(&self.program.address) => attempt,
            };

            let mut subscription = match attempt {
                Ok(subscription) => subscription,
                Err(e) if e.kind() == FaultKind::Unsupported => {
                    tracing::warn!(
                        error = %e,
                        "Push endpoint does not support mention filters, realtime disabled"
                    );
                    self.transition(&token, RealtimePhase::Disabled);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        reconnect_ms = self.config.reconnect_delay_ms,
                        "Subscription failed, retrying"
                    );
                    if !self.wait_reconnect(&token).await {
                        break;
                    }
                    continue;
                }
            };

            self.transition(
                &token,
                RealtimePhase::Active {
                    token: token.clone(),
                    subscription_id: subscription.id,
                },
            );
            tracing::info!(subscription = subscription.id, "Realtime subscription active");

            let stopped = Self::pump(&self, &mut subscription, &token, &permits, &mut in_flight).await;
            subscription.close().await;

            if stopped {
                break 'connect;
            }

            tracing::warn!(
                reconnect_ms = self.config.reconnect_delay_ms,
                "Push stream ended, reconnecting"
            );
            self.transition(&token, RealtimePhase::Subscribing(token.clone()));
            if !self.wait_reconnect(&token).await {
                break;
            }
        }

        // Tasks already running finish on their own.
        in_flight.detach_all();
        tracing::info!("Realtime subscriber stopped");
    }

    /// Dispatches notifications until the stream ends (`false`) or the run is stopped (`true`).
    ///
    /// A notification is only pulled off the stream once a handler slot is
    /// free, so a saturated subscriber leaves the backlog in the stream.
    async fn pump(
        core: &Arc<Self>,
        subscription: &mut Subscription,
        token: &CancellationToken,
        permits: &Arc<Semaphore>,
        in_flight: &mut JoinSet<(Signature, Result<NotificationOutcome>)>,
    ) -> bool {
        let mut slot: Option<OwnedSemaphorePermit> = None;

        loop {
            tokio::select! {
                () = token.cancelled() => return true,
                acquired = Arc::clone(permits).acquire_owned(), if slot.is_none() => {
                    let Ok(permit) = acquired else {
                        return true;
                    };
                    slot = Some(permit);
                }
                next = subscription.recv(), if slot.is_some() => {
                    let Some(notification) = next else {
                        return false;
                    };
                    let Some(permit) = slot.take() else {
                        continue;
                    };
                    let core = Arc::clone(core);
                    in_flight.spawn(async move {
                        let outcome = core.handle(&notification).await;
                        drop(permit);
                        (notification.signature, outcome)
                    });
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    report(done);
                }
            }
        }
    }

    async fn wait_reconnect(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            () = token.cancelled() => false,
            () = sleep(self.config.reconnect_delay()) => true,
        }
    }
}

fn report(done: std::result::Result<(Signature, Result<NotificationOutcome>), tokio::task::JoinError>) {
    match done {
        Ok((signature, Ok(NotificationOutcome::Indexed { slot, inserted }))) => {
            tracing::debug!(%signature, slot, inserted, "Realtime transaction indexed");
        }
        Ok((signature, Ok(NotificationOutcome::AlreadyKnown))) => {
            tracing::trace!(%signature, "Notification already indexed");
        }
        Ok((signature, Ok(NotificationOutcome::NotFound))) => {
            tracing::warn!(%signature, "Notified transaction not found upstream");
        }
        Ok((signature, Err(e))) => {
            tracing::warn!(%signature, error = %e, "Failed to process notification");
        }
        Err(e) => {
            tracing::error!(error = %e, "Notification task panicked");
        }
    }
}

/// Realtime worker for one program.
pub struct RealtimeSubscriber {
    core: Arc<SubscriberCore>,
}

impl RealtimeSubscriber {
    pub fn new(
        program: ProgramTarget,
        rpc: Arc<dyn RpcProvider>,
        store: Arc<dyn RecordStore>,
        subscriber: Arc<dyn LogSubscriber>,
        settings: Arc<IngestSettings>,
    ) -> Self {
        let (phase, _) = watch::channel(RealtimePhase::Stopped);
        Self {
            core: Arc::new(SubscriberCore {
                program_id: program.address.to_string(),
                program,
                rpc,
                store,
                subscriber,
                config: settings.realtime.clone(),
                detail_policy: RetryPolicy::any_error(&settings.retry),
                phase,
            }),
        }
    }

    #[must_use]
    pub fn phase(&self) -> RealtimePhase {
        self.core.phase.borrow().clone()
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        matches!(*self.core.phase.borrow(), RealtimePhase::Disabled)
    }

    /// Watches phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RealtimePhase> {
        self.core.phase.subscribe()
    }

    /// Handles one notification outside the subscription loop.
    ///
    /// # Errors
    ///
    /// Returns store, fetch (after retries) and normalization errors.
    pub async fn handle_notification(
        &self,
        notification: &LogNotification,
    ) -> Result<NotificationOutcome> {
        self.core.handle(notification).await
    }
}

#[async_trait]
impl Indexer for RealtimeSubscriber {
    async fn start(&self) -> Result<()> {
        let token = CancellationToken::new();

        let started = self.core.phase.send_if_modified(|phase| match phase {
            RealtimePhase::Stopped => {
                *phase = RealtimePhase::Subscribing(token.clone());
                true
            }
            _ => false,
        });

        if started {
            tokio::spawn(Arc::clone(&self.core).run(token));
        } else if self.is_disabled() {
            tracing::debug!(program = %self.core.program.name, "Realtime disabled, start ignored");
        }
        Ok(())
    }

    fn stop(&self) {
        self.core.phase.send_if_modified(|phase| {
            let Some(token) = phase.token() else {
                return false;
            };
            token.cancel();
            *phase = RealtimePhase::Stopped;
            true
        });
    }

    fn is_running(&self) -> bool {
        self.core.phase.borrow().token().is_some()
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Realtime
    }

    fn program(&self) -> &ProgramTarget {
        &self.core.program
    }
}

impl Drop for RealtimeSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}
