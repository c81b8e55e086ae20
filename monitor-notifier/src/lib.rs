pub mod manager;
pub mod telegram;

use async_trait::async_trait;
use monitor_core::Result;
use std::fmt::Debug;

pub use manager::NotificationManager;
pub use telegram::TelegramNotifier;

/// A single delivery destination for alert text.
#[async_trait]
pub trait NotificationChannel: Send + Sync + Debug {
    async fn send(&self, text: &str) -> Result<()>;
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
}
