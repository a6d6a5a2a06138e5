use crate::block::BlockRecord;
use crate::config::{CoinRegistry, TelegramConfig};
use crate::error::AppError;
use crate::format::new_block_announcement;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Receives every newly detected block exactly once per detection.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, record: &BlockRecord) -> Result<(), AppError>;
}

/// Writes announcements to the log. Used when no chat channel is configured.
pub struct TracingNotifier {
    registry: CoinRegistry,
}

impl TracingNotifier {
    pub fn new(registry: CoinRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn publish(&self, record: &BlockRecord) -> Result<(), AppError> {
        let root = self.registry.root_url(&record.coin).ok();
        tracing::info!(coin = %record.coin, "{}", new_block_announcement(record, root));
        Ok(())
    }
}

/// Posts announcements to a Telegram channel through the Bot API.
pub struct TelegramNotifier {
    api_base: String,
    token: String,
    channel: String,
    registry: CoinRegistry,
    http: Client,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, registry: CoinRegistry, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            channel: config.channel.clone(),
            registry,
            http,
        }
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn publish(&self, record: &BlockRecord) -> Result<(), AppError> {
        let root = self.registry.root_url(&record.coin).ok();
        let text = new_block_announcement(record, root);

        let resp = self
            .http
            .post(self.send_message_url())
            .json(&serde_json::json!({
                "chat_id": self.channel,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            // Token is part of the URL, keep it out of logs
            .map_err(|e| AppError::Notification(format!("Telegram request failed: {}", e.without_url())))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Telegram returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        tracing::debug!(coin = %record.coin, "Announced block to {}", self.channel);
        Ok(())
    }
}
