mod common;

use common::sig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use solana_ingestor::config::CommitmentLevel;
use solana_ingestor::{FaultKind, IngestError, LogSubscriber, WebSocketSubscriber};
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerSocket = WebSocketStream<tokio::net::TcpStream>;

/// Binds a local endpoint and runs `script` against the first connection.
async fn serve<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let socket = accept_async(tcp).await.unwrap();
        script(socket).await;
    });
    format!("ws://{addr}")
}

async fn next_request(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended before request: {other:?}"),
        }
    }
}

fn logs_notification(slot: u64) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "logsNotification",
        "params": {
            "result": {
                "context": { "slot": slot },
                "value": {
                    "signature": sig(4).to_string(),
                    "err": null,
                    "logs": ["Program log: hello"]
                }
            },
            "subscription": 77
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_subscribe_forwards_notifications_and_unsubscribes() {
    let address = Pubkey::new_unique();
    let (seen_tx, seen_rx) = oneshot::channel::<(Value, Value)>();

    let url = serve(move |mut socket| async move {
        let subscribe = next_request(&mut socket).await;
        socket
            .send(Message::Text(json!({ "jsonrpc": "2.0", "result": 77, "id": subscribe["id"] }).to_string()))
            .await
            .unwrap();
        socket.send(Message::Text(logs_notification(900))).await.unwrap();

        let unsubscribe = next_request(&mut socket).await;
        let _ = seen_tx.send((subscribe, unsubscribe));
    })
    .await;

    let subscriber = WebSocketSubscriber::new(url, CommitmentLevel::Finalized);
    let mut subscription = subscriber.subscribe(&address).await.unwrap();
    assert_eq!(subscription.id, 77);

    let notification = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.signature, sig(4));
    assert_eq!(notification.slot, 900);
    assert_eq!(notification.logs, vec!["Program log: hello".to_string()]);

    subscription.close().await;

    let (subscribe, unsubscribe) = tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscribe["method"], "logsSubscribe");
    assert_eq!(subscribe["params"][0]["mentions"][0], address.to_string());
    assert_eq!(subscribe["params"][1]["commitment"], "finalized");
    assert_eq!(unsubscribe["method"], "logsUnsubscribe");
    assert_eq!(unsubscribe["params"][0], 77);
}

#[tokio::test]
async fn test_rejected_mention_filter_is_unsupported() {
    let url = serve(|mut socket| async move {
        let subscribe = next_request(&mut socket).await;
        let reply = json!({
            "jsonrpc": "2.0",
            "error": { "code": -32602, "message": "Invalid Request: Only 1 address supported" },
            "id": subscribe["id"]
        });
        socket.send(Message::Text(reply.to_string())).await.unwrap();
    })
    .await;

    let err = WebSocketSubscriber::new(url, CommitmentLevel::Confirmed)
        .subscribe(&Pubkey::new_unique())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, IngestError::UnsupportedFilter(_)));
    assert_eq!(err.kind(), FaultKind::Unsupported);
}

#[tokio::test]
async fn test_closed_socket_ends_stream() {
    let url = serve(|mut socket| async move {
        let subscribe = next_request(&mut socket).await;
        socket
            .send(Message::Text(json!({ "jsonrpc": "2.0", "result": 5, "id": subscribe["id"] }).to_string()))
            .await
            .unwrap();
        let _ = socket.close(None).await;
    })
    .await;

    let mut subscription = WebSocketSubscriber::new(url, CommitmentLevel::Confirmed)
        .subscribe(&Pubkey::new_unique())
        .await
        .unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap();
    assert!(next.is_none());
    subscription.close().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WebSocketSubscriber::new(format!("ws://{addr}"), CommitmentLevel::Confirmed)
        .with_handshake_timeout(Duration::from_secs(1))
        .subscribe(&Pubkey::new_unique())
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), FaultKind::Connection);
    assert!(err.is_transient());
}
