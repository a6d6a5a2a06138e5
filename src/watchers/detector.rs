use crate::block::BlockRecord;
use crate::pool_api::{BlocksListing, PoolBlock, StatsSnapshot};

/// Decides whether a freshly observed `lastBlockFound` denotes a new block.
pub trait ChangePolicy: Send + Sync {
    fn has_new_block(&self, last: &BlockRecord, current_timestamp: i64) -> bool;
}

/// Any timestamp different from the stored one is new, including an older one
/// (a pool reorg or a rolled-back stats backend still triggers a notification).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampChanged;

impl ChangePolicy for TimestampChanged {
    fn has_new_block(&self, last: &BlockRecord, current_timestamp: i64) -> bool {
        current_timestamp != last.timestamp
    }
}

/// `stats.lastBlockFound`, or `None` if any key on the path is missing.
pub fn extract_last_block_timestamp(snapshot: &StatsSnapshot) -> Option<i64> {
    snapshot.last_block_found()
}

/// Which lifecycle list a resolved block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStage {
    Candidate,
    Immature,
    Matured,
}

impl BlockStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStage::Candidate => "candidates",
            BlockStage::Immature => "immature",
            BlockStage::Matured => "matured",
        }
    }
}

/// Finds the block whose timestamp equals `timestamp`.
///
/// Lists are searched freshest first: candidates, immature, matured. The
/// first match wins; absent lists are skipped.
pub fn find_block_by_timestamp(
    listing: &BlocksListing,
    timestamp: i64,
) -> Option<(BlockStage, &PoolBlock)> {
    let tiers = [
        (BlockStage::Candidate, &listing.candidates),
        (BlockStage::Immature, &listing.immature),
        (BlockStage::Matured, &listing.matured),
    ];

    for (stage, blocks) in tiers {
        let Some(blocks) = blocks else {
            tracing::debug!("No {} blocks listed", stage.as_str());
            continue;
        };
        if let Some(block) = blocks.iter().find(|b| b.timestamp == Some(timestamp)) {
            return Some((stage, block));
        }
    }
    None
}

/// Builds the full record for `coin` from the block matching `timestamp`.
pub fn resolve_block_by_timestamp(
    coin: &str,
    timestamp: i64,
    listing: &BlocksListing,
) -> Option<BlockRecord> {
    let (stage, block) = find_block_by_timestamp(listing, timestamp)?;
    tracing::debug!(coin = %coin, "Resolved block at {timestamp} in {}", stage.as_str());

    Some(BlockRecord {
        coin: coin.to_string(),
        height: block.height,
        timestamp,
        difficulty: block.difficulty,
        shares: block.shares,
        uncle: block.uncle,
        uncle_height: block.uncle_height,
        orphan: block.orphan,
        hash: block.hash.clone(),
        finder: block.finder.clone(),
        reward: block.reward.clone(),
    })
}
