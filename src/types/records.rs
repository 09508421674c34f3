//! Record types flowing between the upstream, the normalizer and the store.

use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use std::fmt;

/// Upstream transaction as returned by `getTransaction` with `jsonParsed` encoding.
pub type RawTransaction = EncodedConfirmedTransactionWithStatusMeta;

/// Which ingestion mode produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Backfill,
    Realtime,
}

impl SourceMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceMode::Backfill => "backfill",
            SourceMode::Realtime => "realtime",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instruction emitted by the target program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedInstruction {
    pub program_id: String,
    /// Base58 instruction data, when the upstream didn't decode it.
    pub data: Option<String>,
    /// Decoded instruction body, when the upstream has a parser for the program.
    pub parsed: Option<serde_json::Value>,
    /// `true` for instructions found in inner (CPI) instruction lists.
    pub inner: bool,
}

/// The persisted shape of a transaction, reduced to one target program.
///
/// Every entry in `instructions` has `program_id == self.program_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub instructions: Vec<NormalizedInstruction>,
    pub logs: Option<Vec<String>>,
    pub program_id: String,
    pub source: SourceMode,
}

/// One entry of a signature history page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: Signature,
    pub slot: u64,
}
