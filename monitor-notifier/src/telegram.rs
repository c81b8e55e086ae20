use crate::NotificationChannel;
use async_trait::async_trait;
use monitor_core::{MonitorError, Result, TelegramConfig};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

const SEND_TIMEOUT_SECS: u64 = 10;

#[derive(Debug)]
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()?;

        Ok(Self { config, client })
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_endpoint.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    fn params(&self, chat_id: &str, text: &str) -> SendMessageParams {
        SendMessageParams {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode: self.config.parse_mode.clone(),
            disable_web_page_preview: Some(true),
        }
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.send_message_url())
            .json(&self.params(chat_id, text))
            .send()
            .await
            .map_err(|e| MonitorError::Notification(format!("Telegram API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MonitorError::Notification(format!(
                "Telegram API returned error: {}",
                error_text
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut delivered = 0;
        for chat_id in &self.config.chat_ids {
            match self.send_message(chat_id, text).await {
                Ok(_) => {
                    delivered += 1;
                    info!("Telegram notification sent to chat {}", chat_id);
                }
                Err(e) => error!("Failed to send Telegram notification to {}: {}", chat_id, e),
            }
        }

        if delivered == 0 {
            return Err(MonitorError::Notification(
                "Telegram message was not delivered to any chat".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Telegram"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.bot_token.is_empty() && !self.config.chat_ids.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct SendMessageParams {
    chat_id: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<String>,
    disable_web_page_preview: Option<bool>,
}
