#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use solana_ingestor::config::{IngestSettings, RetryConfig};
use solana_ingestor::{
    IngestError, LogNotification, LogSubscriber, RawTransaction, RecordStore, Result,
    RpcProvider, SignatureInfo, Subscription,
};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const SYSTEM: &str = "11111111111111111111111111111111";

/// Deterministic signature from a seed byte.
pub fn sig(n: u8) -> Signature {
    Signature::from([n; 64])
}

pub fn info(n: u8, slot: u64) -> SignatureInfo {
    SignatureInfo {
        signature: sig(n),
        slot,
    }
}

/// Settings with short retry delays so paused-clock tests stay readable.
pub fn fast_settings() -> Arc<IngestSettings> {
    Arc::new(IngestSettings {
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_factor: 2.0,
        },
        ..IngestSettings::default()
    })
}

/// A `jsonParsed` transaction with one instruction for `program` and one System transfer.
pub fn transaction(program: &Pubkey, slot: u64) -> RawTransaction {
    serde_json::from_value(transaction_json(program, slot)).expect("fixture transaction")
}

/// Wire form of [`transaction`], as a node returns it from `getTransaction`.
pub fn transaction_json(program: &Pubkey, slot: u64) -> serde_json::Value {
    json!({
        "slot": slot,
        "blockTime": 1_700_000_000,
        "transaction": {
            "signatures": ["placeholder"],
            "message": {
                "accountKeys": [
                    { "pubkey": SYSTEM, "writable": false, "signer": false, "source": "transaction" },
                    { "pubkey": program.to_string(), "writable": false, "signer": false, "source": "transaction" }
                ],
                "recentBlockhash": SYSTEM,
                "instructions": [
                    {
                        "program": "system",
                        "programId": SYSTEM,
                        "parsed": { "type": "transfer", "info": { "lamports": 1 } },
                        "stackHeight": null
                    },
                    {
                        "programId": program.to_string(),
                        "accounts": [],
                        "data": "3Bxs4h24hBtQy9rw",
                        "stackHeight": null
                    }
                ]
            }
        },
        "meta": {
            "err": null,
            "status": { "Ok": null },
            "fee": 5000,
            "preBalances": [1, 1],
            "postBalances": [1, 1],
            "innerInstructions": [],
            "logMessages": ["Program log: ok"],
            "preTokenBalances": [],
            "postTokenBalances": [],
            "rewards": []
        },
        "version": 0
    })
}

/// [`transaction`] as a base64 blob, which the normalizer refuses.
pub fn binary_transaction(slot: u64) -> RawTransaction {
    serde_json::from_value(json!({
        "slot": slot,
        "blockTime": null,
        "transaction": ["AQID", "base64"],
        "meta": null
    }))
    .expect("fixture binary transaction")
}

// ─────────────────────────────────────────────────────────────────────────────
// RPC
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted upstream.
///
/// History pages are served in push order; once exhausted every page is empty.
pub struct MockRpc {
    program: Pubkey,
    pages: Mutex<VecDeque<Result<Vec<SignatureInfo>>>>,
    slots: Mutex<HashMap<Signature, u64>>,
    missing: Mutex<HashSet<Signature>>,
    malformed: Mutex<HashSet<Signature>>,
    detail_error: Mutex<Option<(i64, String)>>,
    stalled: AtomicBool,
    oversized_above: AtomicUsize,
    /// `(before, limit)` of every history request.
    pub page_calls: Mutex<Vec<(Option<Signature>, usize)>>,
    /// Size of every detail batch request.
    pub detail_calls: Mutex<Vec<usize>>,
    pub single_calls: AtomicUsize,
}

impl MockRpc {
    pub fn new(program: Pubkey) -> Self {
        Self {
            program,
            pages: Mutex::new(VecDeque::new()),
            slots: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            malformed: Mutex::new(HashSet::new()),
            detail_error: Mutex::new(None),
            stalled: AtomicBool::new(false),
            oversized_above: AtomicUsize::new(usize::MAX),
            page_calls: Mutex::new(Vec::new()),
            detail_calls: Mutex::new(Vec::new()),
            single_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_page(&self, page: Vec<SignatureInfo>) {
        let mut slots = self.slots.lock().unwrap();
        for entry in &page {
            slots.insert(entry.signature, entry.slot);
        }
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_error(&self, err: IngestError) {
        self.pages.lock().unwrap().push_back(Err(err));
    }

    /// Detail batches larger than `n` fail with HTTP 413. `0` fails every batch.
    pub fn set_oversized_above(&self, n: usize) {
        self.oversized_above.store(n, Ordering::SeqCst);
    }

    pub fn set_missing(&self, signature: Signature) {
        self.missing.lock().unwrap().insert(signature);
    }

    /// The signature comes back in an encoding the normalizer can't read.
    pub fn set_malformed(&self, signature: Signature) {
        self.malformed.lock().unwrap().insert(signature);
    }

    /// Every detail request fails with this JSON-RPC error.
    pub fn set_detail_error(&self, code: i64, message: &str) {
        *self.detail_error.lock().unwrap() = Some((code, message.to_string()));
    }

    /// Single-transaction lookups never complete.
    pub fn stall_lookups(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    fn detail_failure(&self) -> Option<IngestError> {
        self.detail_error
            .lock()
            .unwrap()
            .clone()
            .map(|(code, message)| IngestError::JsonRpc { code, message })
    }

    pub fn page_calls(&self) -> Vec<(Option<Signature>, usize)> {
        self.page_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<usize> {
        self.detail_calls.lock().unwrap().clone()
    }

    fn lookup(&self, signature: &Signature) -> Option<RawTransaction> {
        if self.missing.lock().unwrap().contains(signature) {
            return None;
        }
        let slot = self.slots.lock().unwrap().get(signature).copied().unwrap_or(100);
        if self.malformed.lock().unwrap().contains(signature) {
            return Some(binary_transaction(slot));
        }
        Some(transaction(&self.program, slot))
    }
}

#[async_trait]
impl RpcProvider for MockRpc {
    async fn get_signatures_for_address(
        &self,
        _address: &Pubkey,
        before: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        self.page_calls.lock().unwrap().push((before, limit));
        self.pages.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn get_transactions(&self, signatures: &[Signature]) -> Result<Vec<Option<RawTransaction>>> {
        self.detail_calls.lock().unwrap().push(signatures.len());
        if signatures.len() > self.oversized_above.load(Ordering::SeqCst) {
            return Err(IngestError::PayloadTooLarge("HTTP 413 Payload Too Large".into()));
        }
        if let Some(err) = self.detail_failure() {
            return Err(err);
        }
        Ok(signatures.iter().map(|s| self.lookup(s)).collect())
    }

    async fn get_transaction(&self, signature: &Signature) -> Result<Option<RawTransaction>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.detail_failure() {
            return Err(err);
        }
        Ok(self.lookup(signature))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Push
// ─────────────────────────────────────────────────────────────────────────────

/// What the next `subscribe` call does.
pub enum Attempt {
    Unsupported,
    Transient,
    /// Delivers the notifications; the stream stays open if `keep_open`.
    Stream {
        notifications: Vec<LogNotification>,
        keep_open: bool,
    },
}

/// Scripted push endpoint. Unscripted attempts fail transiently.
#[derive(Default)]
pub struct MockSubscriber {
    script: Mutex<VecDeque<Attempt>>,
    open: Mutex<Vec<mpsc::Sender<LogNotification>>>,
    pub attempts: AtomicUsize,
    /// Close signal of every subscription handed out.
    pub closers: Mutex<Vec<CancellationToken>>,
}

impl MockSubscriber {
    pub fn new(script: Vec<Attempt>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Notifications still waiting in open streams.
    pub fn queued(&self) -> usize {
        self.open
            .lock()
            .unwrap()
            .iter()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum()
    }
}

pub fn notification(n: u8, slot: u64) -> LogNotification {
    LogNotification {
        signature: sig(n),
        slot,
        err: None,
        logs: vec!["Program log: hello".into()],
    }
}

#[async_trait]
impl LogSubscriber for MockSubscriber {
    async fn subscribe(&self, _address: &Pubkey) -> Result<Subscription> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as u64;
        let next = self.script.lock().unwrap().pop_front();

        match next {
            Some(Attempt::Unsupported) => Err(IngestError::UnsupportedFilter(
                "Invalid mentions: only one address allowed".into(),
            )),
            Some(Attempt::Transient) | None => {
                Err(IngestError::ConnectionError("connection refused".into()))
            }
            Some(Attempt::Stream {
                notifications,
                keep_open,
            }) => {
                let (tx, rx) = mpsc::channel(64);
                for n in notifications {
                    tx.try_send(n).expect("mock channel capacity");
                }
                if keep_open {
                    self.open.lock().unwrap().push(tx);
                }
                let token = CancellationToken::new();
                self.closers.lock().unwrap().push(token.clone());
                Ok(Subscription::new(attempt + 1, rx, token))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store whose cursor lookup always fails.
pub struct BrokenStore;

#[async_trait]
impl RecordStore for BrokenStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn last_indexed_slot(&self, _program_id: &str) -> Result<Option<u64>> {
        Err(IngestError::InternalError("store offline".into()))
    }

    async fn filter_unseen_signatures(
        &self,
        _program_id: &str,
        signatures: &[String],
    ) -> Result<Vec<String>> {
        Ok(signatures.to_vec())
    }

    async fn upsert_batch(&self, _records: &[solana_ingestor::NormalizedRecord]) -> Result<u64> {
        Err(IngestError::InternalError("store offline".into()))
    }

    async fn close(&self) {}
}
