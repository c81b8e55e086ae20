use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use monitor_core::{MonitorConfig, MonitorError, Result};
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const ENV_PREFIX: &str = "CRYPTO_MONITOR";

/// Plain environment names that override the layered configuration.
const BINANCE_API_KEY: &str = "BINANCE_API_KEY";
const BINANCE_API_SECRET: &str = "BINANCE_API_SECRET";
const TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
const TELEGRAM_CHATID: &str = "TELEGRAM_CHATID";

pub struct ConfigManager {
    monitor_config: MonitorConfig,
}

impl ConfigManager {
    /// Defaults, then the file if it exists, then `CRYPTO_MONITOR__SECTION__KEY`
    /// variables, then the plain credential variables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = Config::builder().add_source(File::from(path.as_ref()).required(false));
        Self::build(builder, |key| std::env::var(key).ok())
    }

    fn build<F>(builder: ConfigBuilder<DefaultState>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exchange.excluded_symbols")
                .with_list_parse_key("notification.telegram.chat_ids"),
        );

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(BINANCE_API_KEY) {
            builder = builder.set_override("exchange.api_key", key).map_err(config_error)?;
        }
        if let Some(secret) = non_empty(BINANCE_API_SECRET) {
            builder = builder.set_override("exchange.api_secret", secret).map_err(config_error)?;
        }
        let token = non_empty(TELEGRAM_TOKEN);
        let chat_ids: Option<Vec<String>> = non_empty(TELEGRAM_CHATID).map(|ids| {
            ids.split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        });
        if token.is_some() && chat_ids.is_some() {
            builder = builder
                .set_override("notification.telegram.enabled", true)
                .map_err(config_error)?;
        }
        if let Some(token) = token {
            builder = builder
                .set_override("notification.telegram.bot_token", token)
                .map_err(config_error)?;
        }
        if let Some(chat_ids) = chat_ids {
            builder = builder
                .set_override("notification.telegram.chat_ids", chat_ids)
                .map_err(config_error)?;
        }

        let monitor_config: MonitorConfig = builder
            .build()
            .and_then(Config::try_deserialize::<MonitorConfig>)
            .map_err(config_error)?;

        info!("Configuration loaded successfully");
        debug!(
            telegram = monitor_config.notification.telegram.enabled,
            credentials = monitor_config.exchange.has_credentials(),
            "Configuration summary"
        );

        Ok(Self { monitor_config })
    }

    pub fn get_config(&self) -> &MonitorConfig {
        &self.monitor_config
    }

    pub fn into_config(self) -> MonitorConfig {
        self.monitor_config
    }

    pub fn validate(&self) -> Result<()> {
        let config = &self.monitor_config;

        if config.exchange.rest_endpoint.is_empty() {
            return Err(invalid("exchange.rest_endpoint is empty"));
        }
        if config.exchange.quote_asset.is_empty() {
            return Err(invalid("exchange.quote_asset is empty"));
        }
        if config.exchange.timeout_secs == 0 {
            return Err(invalid("exchange.timeout_secs must be positive"));
        }

        let analyzer = &config.analyzer;
        if analyzer.poll_interval_secs == 0 {
            return Err(invalid("analyzer.poll_interval_secs must be positive"));
        }
        if analyzer.snapshot_max_age_minutes <= 0 || analyzer.universe_max_age_minutes <= 0 {
            return Err(invalid("analyzer max ages must be positive"));
        }

        let trend = &config.trend;
        if trend.price_change_threshold <= 0.0
            || trend.price_reversal_delta <= 0.0
            || trend.volume_increase_threshold <= 0.0
        {
            return Err(invalid("trend thresholds must be positive"));
        }
        if trend.price_debounce_minutes <= 0 || trend.volume_debounce_hours <= 0 {
            return Err(invalid("trend debounce windows must be positive"));
        }

        let telegram = &config.notification.telegram;
        if telegram.enabled && (telegram.bot_token.is_empty() || telegram.chat_ids.is_empty()) {
            return Err(invalid("Telegram is enabled without a bot token and chat ids"));
        }

        info!("Configuration validation passed");
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.monitor_config)
            .map_err(|e| MonitorError::Configuration(e.to_string()))?;

        std::fs::write(path, yaml).map_err(|e| MonitorError::Configuration(e.to_string()))?;

        info!("Configuration saved to file");
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> MonitorError {
    MonitorError::Configuration(e.to_string())
}

fn invalid(reason: &str) -> MonitorError {
    MonitorError::Configuration(reason.to_string())
}
