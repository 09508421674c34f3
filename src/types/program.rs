//! Static description of a program to ingest.

use crate::utils::error::{IngestError, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// One configured on-chain program and the ingestion modes enabled for it.
///
/// Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramTarget {
    pub address: Pubkey,
    pub name: String,
    pub description: Option<String>,
    /// Slot to start backfilling from when nothing has been persisted yet.
    pub start_slot: Option<u64>,
    pub realtime: bool,
    pub historical: bool,
}

impl ProgramTarget {
    /// Creates a target with both modes enabled and no start slot.
    pub fn new(address: Pubkey, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            description: None,
            start_slot: None,
            realtime: true,
            historical: true,
        }
    }

    #[must_use]
    pub fn with_start_slot(mut self, slot: u64) -> Self {
        self.start_slot = Some(slot);
        self
    }

    #[must_use]
    pub fn with_modes(mut self, realtime: bool, historical: bool) -> Self {
        self.realtime = realtime;
        self.historical = historical;
        self
    }

    /// Configured start slot, `0` when unset.
    #[must_use]
    pub fn configured_start(&self) -> u64 {
        self.start_slot.unwrap_or(0)
    }
}

/// On-disk shape of a program entry in the programs file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_slot: Option<u64>,
    #[serde(default = "enabled")]
    pub realtime: bool,
    #[serde(default = "enabled")]
    pub historical: bool,
}

fn enabled() -> bool {
    true
}

impl TryFrom<ProgramEntry> for ProgramTarget {
    type Error = IngestError;

    fn try_from(entry: ProgramEntry) -> Result<Self> {
        Ok(Self {
            address: Pubkey::from_str(&entry.id)?,
            name: entry.name,
            description: entry.description,
            start_slot: entry.start_slot,
            realtime: entry.realtime,
            historical: entry.historical,
        })
    }
}

/// Parses a JSON array of program entries.
///
/// # Errors
///
/// Returns `SerializationError` for malformed JSON and `InvalidPublicKey` for a bad `id`.
pub fn parse_programs(json: &str) -> Result<Vec<ProgramTarget>> {
    let entries: Vec<ProgramEntry> = serde_json::from_str(json)?;
    entries.into_iter().map(ProgramTarget::try_from).collect()
}
