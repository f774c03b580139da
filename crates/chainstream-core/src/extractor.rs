//! Flattening of blocks into transaction streams.

use crate::error::StreamError;
use crate::types::{BlockRef, BlockTransaction, StreamItem, TransactionRef};

/// Projects fetched blocks into transactions or transaction hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionExtractor {
    full: bool,
}

impl TransactionExtractor {
    /// Emit full transaction bodies. Blocks must be fetched with full transactions.
    pub fn full() -> Self {
        Self { full: true }
    }

    /// Emit hashes only. Blocks can be fetched without transaction bodies.
    pub fn hashes_only() -> Self {
        Self { full: false }
    }

    /// Whether blocks must be requested with full transaction bodies.
    pub fn needs_full_transactions(&self) -> bool {
        self.full
    }

    /// Items for one block, in block order.
    pub fn extract(&self, block: &BlockRef) -> Result<Vec<StreamItem>, StreamError> {
        if self.full {
            Ok(transactions(block)?
                .into_iter()
                .map(StreamItem::Transaction)
                .collect())
        } else {
            Ok(transaction_hashes(block)
                .into_iter()
                .map(StreamItem::TransactionHash)
                .collect())
        }
    }
}

/// Full transactions of `block`, with block number, block hash and index filled in.
///
/// Fails if the block only carries hashes or if a transaction claims a
/// different position than the one it occupies in the block.
pub fn transactions(block: &BlockRef) -> Result<Vec<TransactionRef>, StreamError> {
    block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let BlockTransaction::Full(tx) = entry else {
                return Err(StreamError::Malformed(format!(
                    "block {} transaction {i} has no body",
                    block.number
                )));
            };
            let index = u32::try_from(i)
                .map_err(|_| StreamError::Malformed(format!("block {} too large", block.number)))?;
            let mut tx = tx.clone();
            if tx.block_number.is_some_and(|n| n != block.number) {
                return Err(StreamError::Malformed(format!(
                    "transaction {} claims block {:?}, found in block {}",
                    tx.hash, tx.block_number, block.number
                )));
            }
            if tx.transaction_index.is_some_and(|idx| idx != index) {
                return Err(StreamError::Malformed(format!(
                    "transaction {} claims index {:?}, found at {index}",
                    tx.hash, tx.transaction_index
                )));
            }
            tx.block_number = Some(block.number);
            tx.block_hash.get_or_insert_with(|| block.hash.clone());
            tx.transaction_index = Some(index);
            Ok(tx)
        })
        .collect()
}

/// Transaction hashes of `block` in block order. Works for hash-only and full blocks.
pub fn transaction_hashes(block: &BlockRef) -> Vec<String> {
    block
        .transactions
        .iter()
        .map(|t| t.hash().to_string())
        .collect()
}
