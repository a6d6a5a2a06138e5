use crate::error::AppError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const CONFIG_ENV: &str = "POOL_BLOCK_WATCH_CONFIG";
pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
const APP_DIR: &str = "pool-block-watch";

fn default_poll_interval_secs() -> u64 {
    25
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

/// Static mapping from coin slug to pool root URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CoinRegistry {
    coins: BTreeMap<String, String>,
}

impl CoinRegistry {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            coins: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into().trim_end_matches('/').to_string()))
                .collect(),
        }
    }

    pub fn coins(&self) -> impl Iterator<Item = &str> {
        self.coins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn root_url(&self, coin: &str) -> Result<&str, AppError> {
        self.coins
            .get(coin)
            .map(String::as_str)
            .ok_or_else(|| AppError::DataNotFound(format!("The coin {coin} is not available")))
    }

    /// `{root}/api/{path}` for the given coin.
    pub fn api_url(&self, coin: &str, path: &str) -> Result<String, AppError> {
        Ok(format!("{}/api/{}", self.root_url(coin)?, path))
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.coins.is_empty() {
            return Err(AppError::Config("no coins configured".into()));
        }
        for (coin, root) in &self.coins {
            Url::parse(root)
                .map_err(|e| AppError::Config(format!("invalid url for coin {coin}: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    pub channel: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub coins: CoinRegistry,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl AppConfig {
    pub fn from_json(content: &str) -> Result<Self, AppError> {
        let mut config: AppConfig = serde_json::from_str(content)
            .map_err(|e| AppError::Config(format!("malformed config: {e}")))?;

        // Re-normalise trailing slashes, serde(transparent) bypasses CoinRegistry::new
        config.coins = CoinRegistry::new(config.coins.coins);
        config.coins.validate()?;

        if config.poll_interval_secs == 0 {
            return Err(AppError::Config("poll_interval_secs must be > 0".into()));
        }

        if let Some(telegram) = config.telegram.as_mut() {
            if let Ok(token) = std::env::var(TELEGRAM_TOKEN_ENV) {
                if !token.is_empty() {
                    telegram.bot_token = token;
                }
            }
            if telegram.bot_token.is_empty() {
                return Err(AppError::Config(format!(
                    "telegram.bot_token missing and {TELEGRAM_TOKEN_ENV} not set"
                )));
            }
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// CLI argument, then `POOL_BLOCK_WATCH_CONFIG`, then the user config dir.
    pub fn resolve_path(cli_arg: Option<String>) -> Result<PathBuf, AppError> {
        if let Some(arg) = cli_arg {
            return Ok(PathBuf::from(arg));
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(env_path));
        }
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("config.json"))
            .ok_or_else(|| AppError::Config("No config dir".into()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn state_path(&self) -> Result<PathBuf, AppError> {
        if let Some(path) = &self.state_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|d| d.join(APP_DIR).join("blocks.json"))
            .ok_or_else(|| AppError::Config("No data dir".into()))
    }
}
