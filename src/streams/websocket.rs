//! `logsSubscribe` over a Solana RPC WebSocket endpoint.
//!
//! Each subscription owns its own socket. A background task forwards
//! `logsNotification` messages into the subscription channel until the socket
//! ends or the subscription is closed, in which case it sends
//! `logsUnsubscribe` before closing the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::{LogNotification, LogSubscriber, Subscription};
use crate::config::CommitmentLevel;
use crate::utils::error::{IngestError, Result};
use crate::utils::logging::redact_url;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;
/// JSON-RPC "invalid params", returned by nodes that don't support the mention filter.
const INVALID_PARAMS: i64 = -32602;

/// WebSocket-backed [`LogSubscriber`].
///
/// # Example
///
/// ```no_run
/// use solana_ingestor::config::CommitmentLevel;
/// use solana_ingestor::streams::{LogSubscriber, WebSocketSubscriber};
/// use solana_sdk::pubkey::Pubkey;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let subscriber = WebSocketSubscriber::new("ws://127.0.0.1:8900", CommitmentLevel::Confirmed);
/// let mut subscription = subscriber.subscribe(&Pubkey::default()).await?;
/// while let Some(notification) = subscription.recv().await {
///     println!("{} @ {}", notification.signature, notification.slot);
/// }
/// # Ok(())
/// # }
/// ```
pub struct WebSocketSubscriber {
    ws_url: String,
    commitment: CommitmentLevel,
    handshake_timeout: Duration,
    channel_capacity: usize,
}

/// WebSocket notification from Solana (logsSubscribe)
#[derive(Debug, Deserialize)]
struct LogsNotification {
    params: LogsNotificationParams,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationParams {
    result: LogsNotificationResult,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationResult {
    value: LogsNotificationValue,
    context: LogsNotificationContext,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationValue {
    signature: String,
    #[serde(default)]
    logs: Vec<String>,
    err: Option<Value>,
}

impl LogsNotification {
    fn into_notification(self) -> Option<LogNotification> {
        let result = self.params.result;
        let signature = Signature::from_str(&result.value.signature).ok()?;
        Some(LogNotification {
            signature,
            slot: result.context.slot,
            err: result.value.err,
            logs: result.value.logs,
        })
    }
}

/// Maps a JSON-RPC error on the subscribe call.
fn subscribe_error(error: &Value) -> IngestError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    if code == INVALID_PARAMS || message.contains("mentions") {
        IngestError::UnsupportedFilter(message)
    } else {
        IngestError::JsonRpc {
            code,
            message: format!("logsSubscribe: {message}"),
        }
    }
}

impl WebSocketSubscriber {
    pub fn new(ws_url: impl Into<String>, commitment: CommitmentLevel) -> Self {
        Self {
            ws_url: ws_url.into(),
            commitment,
            handshake_timeout: Duration::from_secs(10),
            channel_capacity: 1024,
        }
    }

    /// Overrides how long to wait for the subscription confirmation.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl LogSubscriber for WebSocketSubscriber {
    async fn subscribe(&self, address: &Pubkey) -> Result<Subscription> {
        tracing::debug!(
            ws_url = %redact_url(&self.ws_url),
            %address,
            "Connecting push endpoint"
        );

        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| IngestError::ConnectionError(format!("WebSocket connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [address.to_string()] },
                { "commitment": self.commitment.as_str() }
            ]
        });
        write
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| IngestError::ConnectionError(format!("Failed to send subscription: {e}")))?;

        let confirmation = async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(reply) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if reply.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
                            continue;
                        }
                        if let Some(error) = reply.get("error") {
                            return Err(subscribe_error(error));
                        }
                        return reply.get("result").and_then(Value::as_u64).ok_or_else(|| {
                            IngestError::RpcError(format!("unexpected logsSubscribe reply: {text}"))
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(IngestError::ConnectionError(
                            "socket closed before subscription was confirmed".into(),
                        ))
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(IngestError::ConnectionError(e.to_string())),
                }
            }
        };

        let subscription_id = tokio::time::timeout(self.handshake_timeout, confirmation)
            .await
            .map_err(|_| IngestError::Timeout("logsSubscribe confirmation".into()))??;

        tracing::info!(%address, subscription = subscription_id, "Push subscription established");

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task: JoinHandle<Result<()>> = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        let unsubscribe = json!({
                            "jsonrpc": "2.0",
                            "id": UNSUBSCRIBE_REQUEST_ID,
                            "method": "logsUnsubscribe",
                            "params": [subscription_id]
                        });
                        if let Err(e) = write.send(Message::Text(unsubscribe.to_string())).await {
                            return Err(IngestError::ConnectionError(format!(
                                "logsUnsubscribe failed: {e}"
                            )));
                        }
                        let _ = write.close().await;
                        return Ok(());
                    }
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(raw) = serde_json::from_str::<LogsNotification>(&text) else {
                                continue;
                            };
                            if let Some(notification) = raw.into_notification() {
                                if tx.send(notification).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(IngestError::ConnectionError("push stream closed".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(IngestError::ConnectionError(e.to_string())),
                    }
                }
            }
        });

        Ok(Subscription::new(subscription_id, rx, shutdown).with_task(task))
    }
}
