//! Push notification transport.
//!
//! A [`LogSubscriber`] establishes a subscription for transactions mentioning an
//! address and hands back a [`Subscription`]: a stream of [`LogNotification`]s
//! plus a handle to tear the subscription down.

pub mod websocket;

use crate::utils::error::Result;
use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use websocket::WebSocketSubscriber;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// A transaction that mentioned the subscribed address.
#[derive(Debug, Clone, PartialEq)]
pub struct LogNotification {
    pub signature: Signature,
    pub slot: u64,
    /// Transaction error, if it failed on-chain.
    pub err: Option<serde_json::Value>,
    pub logs: Vec<String>,
}

/// Establishes push subscriptions.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    /// Subscribes to transactions mentioning `address`.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::UnsupportedFilter` when the endpoint rejects the
    /// mention filter itself. Any other error is treated as transient by callers.
    async fn subscribe(&self, address: &Pubkey) -> Result<Subscription>;
}

/// A live subscription.
///
/// `recv` yields notifications until the transport ends; `close` tears it down.
pub struct Subscription {
    pub id: u64,
    receiver: mpsc::Receiver<LogNotification>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl Subscription {
    /// Wraps a notification channel. Cancelling `shutdown` is the close signal.
    #[must_use]
    pub fn new(
        id: u64,
        receiver: mpsc::Receiver<LogNotification>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            receiver,
            shutdown,
            task: None,
        }
    }

    /// Attaches the background task driving the transport, awaited on close.
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<Result<()>>) -> Self {
        self.task = Some(task);
        self
    }

    /// Next notification, `None` once the transport has ended.
    pub async fn recv(&mut self) -> Option<LogNotification> {
        self.receiver.recv().await
    }

    /// Best-effort teardown. Failures are logged, never returned.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        self.receiver.close();

        let Some(task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                tracing::warn!(subscription = self.id, error = %e, "Subscription closed with error");
            }
            Ok(Err(e)) => {
                tracing::warn!(subscription = self.id, error = %e, "Subscription task failed");
            }
            Err(_) => {
                tracing::warn!(subscription = self.id, "Timed out closing subscription");
            }
        }
    }
}
