//! What a block-indexed stream emits for each block number it walks.

use crate::error::StreamError;
use crate::extractor::TransactionExtractor;
use crate::fetcher::BlockFetcher;
use crate::log_filter::LogFilterStream;
use crate::types::{BlockNumber, StreamItem};

#[derive(Debug, Clone)]
pub enum BlockProjection {
    /// The block hash, fetched without transaction bodies.
    BlockHash,
    /// The block itself.
    Block { full_transactions: bool },
    /// The block's transactions (or their hashes).
    Transactions(TransactionExtractor),
    /// Logs of the block matching a filter.
    Logs(LogFilterStream),
}

impl BlockProjection {
    /// Items for block `number`. `Ok(None)` if the node does not have that block.
    pub async fn project(
        &self,
        fetcher: &BlockFetcher,
        number: BlockNumber,
    ) -> Result<Option<Vec<StreamItem>>, StreamError> {
        match self {
            Self::BlockHash => Ok(fetcher.block(number, false).await?.map(|b| {
                vec![StreamItem::BlockHash {
                    number: b.number,
                    hash: b.hash,
                }]
            })),
            Self::Block { full_transactions } => Ok(fetcher
                .block(number, *full_transactions)
                .await?
                .map(|b| vec![StreamItem::Block(b)])),
            Self::Transactions(extractor) => {
                match fetcher.block(number, extractor.needs_full_transactions()).await? {
                    Some(block) => extractor.extract(&block).map(Some),
                    None => Ok(None),
                }
            }
            Self::Logs(stream) => Ok(Some(
                stream
                    .logs_for_block(fetcher, number)
                    .await?
                    .into_iter()
                    .map(StreamItem::Log)
                    .collect(),
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BlockHash => "block-hashes",
            Self::Block { .. } => "blocks",
            Self::Transactions(e) if e.needs_full_transactions() => "transactions",
            Self::Transactions(_) => "transaction-hashes",
            Self::Logs(_) => "logs",
        }
    }
}
