use crate::NotificationChannel;
use async_trait::async_trait;
use monitor_core::Notifier;
use tracing::{debug, error, info};

/// Fans alert text out to every enabled channel.
#[derive(Debug, Default)]
pub struct NotificationManager {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Box<dyn NotificationChannel>) {
        info!("Registered {} notification channel", channel.name());
        self.channels.push(channel);
    }

    /// Send through every enabled channel. Channel failures are logged and
    /// never abort delivery to the remaining channels.
    pub async fn send_all(&self, text: &str) -> usize {
        let mut delivered = 0;

        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            debug!("Sending notification via {}", channel.name());
            match channel.send(text).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("Failed to send via {}: {}", channel.name(), e),
            }
        }

        delivered
    }

    pub fn get_enabled_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name().to_string())
            .collect()
    }
}

#[async_trait]
impl Notifier for NotificationManager {
    async fn notify(&self, text: &str) {
        if self.send_all(text).await == 0 && !self.get_enabled_channels().is_empty() {
            error!("Notification was not delivered by any channel");
        }
    }
}
