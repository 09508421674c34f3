//! Reduction of upstream transactions to target-program records.
//!
//! The normalizer is a pure function of its inputs: it walks the top-level
//! instruction list, then every inner-instruction block, and keeps only the
//! instructions emitted by the target program. Order is preserved within each
//! list, top-level entries come first.

use crate::types::records::{
    NormalizedInstruction, NormalizedRecord, RawTransaction, SourceMode,
};
use crate::utils::error::{IngestError, Result};
use solana_sdk::pubkey::Pubkey;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedTransaction, UiInstruction, UiMessage, UiParsedInstruction, UiTransactionStatusMeta,
};

/// Builds the normalized record of `raw` for `target`.
///
/// # Errors
///
/// Returns `DecodingError` if the transaction isn't JSON-encoded or a compiled
/// instruction references an account index outside the message.
pub fn normalize(
    signature: &str,
    raw: &RawTransaction,
    target: &Pubkey,
    source: SourceMode,
) -> Result<NormalizedRecord> {
    let target_id = target.to_string();
    let meta = raw.transaction.meta.as_ref();

    let ui_tx = match &raw.transaction.transaction {
        EncodedTransaction::Json(ui_tx) => ui_tx,
        _ => {
            return Err(IngestError::DecodingError(format!(
                "transaction {signature} is not JSON encoded"
            )))
        }
    };

    let keys = account_keys(&ui_tx.message, meta);
    let mut instructions = Vec::new();

    match &ui_tx.message {
        UiMessage::Parsed(msg) => {
            for ix in &msg.instructions {
                collect(ix, &keys, &target_id, false, &mut instructions)?;
            }
        }
        UiMessage::Raw(msg) => {
            for compiled in &msg.instructions {
                let ix = UiInstruction::Compiled(compiled.clone());
                collect(&ix, &keys, &target_id, false, &mut instructions)?;
            }
        }
    }

    if let Some(OptionSerializer::Some(blocks)) = meta.map(|m| &m.inner_instructions) {
        for block in blocks {
            for ix in &block.instructions {
                collect(ix, &keys, &target_id, true, &mut instructions)?;
            }
        }
    }

    let logs = match meta.map(|m| &m.log_messages) {
        Some(OptionSerializer::Some(logs)) => Some(logs.clone()),
        _ => None,
    };

    Ok(NormalizedRecord {
        signature: signature.to_string(),
        slot: raw.slot,
        block_time: raw.block_time,
        instructions,
        logs,
        program_id: target_id,
        source,
    })
}

/// Static message keys followed by lookup-table keys (writable, then readonly).
fn account_keys<'a>(message: &'a UiMessage, meta: Option<&'a UiTransactionStatusMeta>) -> Vec<&'a str> {
    let mut keys: Vec<&str> = match message {
        UiMessage::Parsed(msg) => msg.account_keys.iter().map(|k| k.pubkey.as_str()).collect(),
        UiMessage::Raw(msg) => msg.account_keys.iter().map(String::as_str).collect(),
    };

    if let Some(OptionSerializer::Some(loaded)) = meta.map(|m| &m.loaded_addresses) {
        keys.extend(loaded.writable.iter().map(String::as_str));
        keys.extend(loaded.readonly.iter().map(String::as_str));
    }
    keys
}

fn collect(
    ix: &UiInstruction,
    keys: &[&str],
    target_id: &str,
    inner: bool,
    out: &mut Vec<NormalizedInstruction>,
) -> Result<()> {
    let program_id = match ix {
        UiInstruction::Parsed(UiParsedInstruction::Parsed(p)) => p.program_id.as_str(),
        UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(p)) => p.program_id.as_str(),
        UiInstruction::Compiled(c) => {
            let index = usize::from(c.program_id_index);
            *keys.get(index).ok_or_else(|| {
                IngestError::DecodingError(format!(
                    "program id index {index} out of range ({} account keys)",
                    keys.len()
                ))
            })?
        }
    };

    if program_id != target_id {
        return Ok(());
    }

    let (data, parsed) = match ix {
        UiInstruction::Parsed(UiParsedInstruction::Parsed(p)) => (None, Some(p.parsed.clone())),
        UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(p)) => {
            (Some(p.data.clone()), None)
        }
        UiInstruction::Compiled(c) => (Some(c.data.clone()), None),
    };

    out.push(NormalizedInstruction {
        program_id: program_id.to_string(),
        data,
        parsed,
        inner,
    });
    Ok(())
}
