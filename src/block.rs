use serde::{Deserialize, Serialize};

/// Timestamp of a placeholder record that has never matched a pool block.
pub const NEVER_OBSERVED: i64 = -1;

/// Most recently known mined block for one coin.
///
/// Unknown fields are `None`; a freshly created placeholder has every
/// optional field unset and `timestamp == NEVER_OBSERVED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub coin: String,
    pub height: Option<u64>,
    pub timestamp: i64,
    pub difficulty: Option<u64>,
    pub shares: Option<u64>,
    pub uncle: Option<bool>,
    pub uncle_height: Option<u64>,
    pub orphan: Option<bool>,
    pub hash: Option<String>,
    pub finder: Option<String>,
    /// Kept as a decimal string, pool rewards are denominated in wei.
    pub reward: Option<String>,
}

impl BlockRecord {
    pub fn placeholder(coin: &str) -> Self {
        Self {
            coin: coin.to_string(),
            height: None,
            timestamp: NEVER_OBSERVED,
            difficulty: None,
            shares: None,
            uncle: None,
            uncle_height: None,
            orphan: None,
            hash: None,
            finder: None,
            reward: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.timestamp == NEVER_OBSERVED
    }
}
