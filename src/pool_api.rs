use crate::config::CoinRegistry;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Decoded `GET {base}/api/stats` response.
///
/// Kept as raw JSON: pools differ in which keys they emit, so every lookup
/// is guarded individually.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    raw: Value,
}

impl StatsSnapshot {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    fn stats_field(&self, key: &str) -> Option<&Value> {
        self.raw.get("stats").and_then(|s| s.get(key))
    }

    pub fn hashrate(&self) -> Option<f64> {
        self.raw.get("hashrate").and_then(Value::as_f64)
    }

    pub fn miners_total(&self) -> Option<u64> {
        self.raw.get("minersTotal").and_then(lenient_u64_value)
    }

    pub fn last_block_found(&self) -> Option<i64> {
        self.stats_field("lastBlockFound").and_then(lenient_i64_value)
    }

    pub fn n_shares(&self) -> Option<u64> {
        self.stats_field("nShares").and_then(lenient_u64_value)
    }

    pub fn round_shares(&self) -> Option<u64> {
        self.stats_field("roundShares").and_then(lenient_u64_value)
    }
}

/// A block entry as listed by `GET {base}/api/blocks`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolBlock {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub height: Option<u64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub difficulty: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub shares: Option<u64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub uncle: Option<bool>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub uncle_height: Option<u64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub orphan: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub finder: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reward: Option<String>,
}

/// The three lifecycle lists of `GET {base}/api/blocks`. Absent or null lists are `None`.
///
/// Entries that are not block objects are dropped, so one bad entry never hides the rest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlocksListing {
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub candidates: Option<Vec<PoolBlock>>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub immature: Option<Vec<PoolBlock>>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub matured: Option<Vec<PoolBlock>>,
}

/// One entry of `GET {base}/api/miners`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerEntry {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub last_beat: Option<i64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub offline: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinersListing {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hashrate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub miners_total: Option<u64>,
    #[serde(default)]
    pub miners: HashMap<String, MinerEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatsSection {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub blocks_found: Option<u64>,
}

/// `GET {base}/api/accounts/{address}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hashrate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub workers_online: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub workers_total: Option<u64>,
    #[serde(default)]
    pub stats: Option<AccountStatsSection>,
}

impl AccountStats {
    pub fn blocks_found(&self) -> Option<u64> {
        self.stats.as_ref().and_then(|s| s.blocks_found)
    }
}

// Pools are inconsistent about numbers vs numeric strings; anything else is "unknown".

fn lenient_u64_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(lenient_u64_value(&Value::deserialize(d)?))
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(lenient_i64_value(&Value::deserialize(d)?))
}

fn lenient_blocks<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<PoolBlock>>, D::Error> {
    let Value::Array(entries) = Value::deserialize(d)? else {
        return Ok(None);
    };
    let total = entries.len();
    let blocks: Vec<PoolBlock> = entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if blocks.len() < total {
        tracing::debug!("Dropped {} malformed block entries", total - blocks.len());
    }
    Ok(Some(blocks))
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Read access to a coin's pool statistics.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self, coin: &str) -> Result<StatsSnapshot, AppError>;
    async fn fetch_blocks(&self, coin: &str) -> Result<BlocksListing, AppError>;
}

/// REST client for open-ethereum-pool style stats APIs
pub struct PoolApiClient {
    registry: CoinRegistry,
    http: Client,
}

impl PoolApiClient {
    pub fn new(registry: CoinRegistry, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { registry, http }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        tracing::debug!("Querying {url}");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::RemoteUnavailable(format!("Request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::RemoteUnavailable(format!(
                "{url} returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AppError::RemoteUnavailable(format!("Failed to parse {url}: {e}")))
    }

    /// List miners currently known to the pool
    pub async fn fetch_miners(&self, coin: &str) -> Result<MinersListing, AppError> {
        let url = self.registry.api_url(coin, "miners")?;
        self.get_json(&url).await
    }

    /// Stats for one wallet address
    pub async fn fetch_account(&self, coin: &str, address: &str) -> Result<AccountStats, AppError> {
        let url = self.registry.api_url(coin, &format!("accounts/{address}"))?;
        self.get_json(&url).await
    }
}

#[async_trait]
impl StatsSource for PoolApiClient {
    async fn fetch_stats(&self, coin: &str) -> Result<StatsSnapshot, AppError> {
        let url = self.registry.api_url(coin, "stats")?;
        let raw: Value = self.get_json(&url).await?;
        if !raw.is_object() {
            return Err(AppError::RemoteUnavailable(format!(
                "{url} did not return a JSON object"
            )));
        }
        Ok(StatsSnapshot::new(raw))
    }

    async fn fetch_blocks(&self, coin: &str) -> Result<BlocksListing, AppError> {
        let url = self.registry.api_url(coin, "blocks")?;
        self.get_json(&url).await
    }
}
