pub mod clock;
pub mod model;
pub mod storage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{
    base_asset, exchange_symbol_id, unified_symbol, DailyStats, MarketSnapshotDocument,
    SymbolUniverseDocument, TickerSnapshot,
};
pub use storage::{DocumentStore, JsonFileStore, MemoryStore, SnapshotStore, StoreError};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange error {code}: {body}")]
    Exchange { code: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No balance for {0}")]
    InsufficientBalance(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Source of normalized ticker readings for the analyzer.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// The symbol universe the analyzer should track, e.g. `["BTC/USDT", ...]`.
    async fn tracked_symbols(&self) -> Result<Vec<String>>;

    /// Fetch tickers for `symbols`. Symbols without a recent trade are omitted
    /// from the result rather than reported as errors.
    async fn fetch_tickers(&self, symbols: &[String]) -> Result<BTreeMap<String, TickerSnapshot>>;
}

/// Outbound alert delivery. Implementations log delivery failures instead of
/// returning them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub exchange: ExchangeConfig,
    pub storage: StorageConfig,
    pub analyzer: AnalyzerConfig,
    pub trend: TrendConfig,
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub rest_endpoint: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: i64,
    pub timeout_secs: u64,
    pub quote_asset: String,
    pub excluded_symbols: Vec<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_endpoint: "https://api.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5_000,
            timeout_secs: 30,
            quote_asset: "USDT".to_string(),
            excluded_symbols: ["TUSD/USDT", "BUSD/USDT", "USDC/USDT", "DAI/USDT", "JUV/USDT", "SUS/USDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ExchangeConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub poll_interval_secs: u64,
    pub snapshot_max_age_minutes: i64,
    pub universe_max_age_minutes: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            snapshot_max_age_minutes: 60,
            universe_max_age_minutes: 120,
        }
    }
}

/// Thresholds and debounce windows of the trend tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Minimum absolute price move, in percent, before anything is alerted.
    pub price_change_threshold: f64,
    /// A same-direction move must differ from the last alerted one by more than this.
    pub price_reversal_delta: f64,
    pub price_debounce_minutes: i64,
    pub volume_increase_threshold: f64,
    pub volume_debounce_hours: i64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            price_change_threshold: 4.0,
            price_reversal_delta: 2.0,
            price_debounce_minutes: 40,
            volume_increase_threshold: 15.0,
            volume_debounce_hours: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub api_endpoint: String,
    pub bot_token: String,
    pub chat_ids: Vec<String>,
    pub parse_mode: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_endpoint: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            chat_ids: Vec::new(),
            parse_mode: Some("HTML".to_string()),
        }
    }
}
