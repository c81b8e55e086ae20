use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One symbol's market reading at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub datetime: Option<DateTime<Utc>>,
    pub price: f64,
    pub vwap: Option<f64>,
    /// 24h volume in base-asset units.
    pub volume: f64,
    pub h24: DailyStats,
}

/// Rolling 24h window statistics as reported by the exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    /// Exchange-reported percentage change. Informational only.
    pub change: f64,
}

impl TickerSnapshot {
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            datetime: None,
            price,
            vwap: None,
            volume,
            h24: DailyStats::default(),
        }
    }
}

/// The persisted "last full snapshot". Replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshotDocument {
    pub last_update: DateTime<Utc>,
    pub data: BTreeMap<String, TickerSnapshot>,
}

impl MarketSnapshotDocument {
    pub fn new(last_update: DateTime<Utc>, data: BTreeMap<String, TickerSnapshot>) -> Self {
        Self { last_update, data }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_update)
    }

    /// Strictly older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

/// The persisted tracked symbol universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolUniverseDocument {
    pub last_update: DateTime<Utc>,
    pub symbols: Vec<String>,
}

impl SymbolUniverseDocument {
    pub fn new(last_update: DateTime<Utc>, symbols: Vec<String>) -> Self {
        Self {
            last_update,
            symbols,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.last_update) > max_age
    }
}

/// `BTC/USDT` -> `BTCUSDT`
pub fn exchange_symbol_id(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// `("btc", "usdt")` -> `BTC/USDT`
pub fn unified_symbol(base: &str, quote: &str) -> String {
    format!("{}/{}", base.to_uppercase(), quote.to_uppercase())
}

/// Base asset of a unified symbol, `BTC/USDT` -> `BTC`.
pub fn base_asset(symbol: &str) -> &str {
    symbol.split('/').next().unwrap_or(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_document_layout() {
        let mut data = BTreeMap::new();
        data.insert("BTC/USDT".to_string(), TickerSnapshot::new("BTC/USDT", 100.0, 5.0));
        let doc = MarketSnapshotDocument::new(
            "2024-01-01T00:00:00Z".parse().unwrap(),
            data,
        );

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["lastUpdate"], "2024-01-01T00:00:00Z");
        assert_eq!(json["data"]["BTC/USDT"]["price"], 100.0);
        assert_eq!(json["data"]["BTC/USDT"]["h24"]["change"], 0.0);
    }

    #[test]
    fn test_snapshot_staleness_is_strict() {
        let now: DateTime<Utc> = "2024-01-01T01:00:00Z".parse().unwrap();
        let doc = MarketSnapshotDocument::new(now - Duration::hours(1), BTreeMap::new());
        assert!(!doc.is_stale(now, Duration::hours(1)));
        assert!(doc.is_stale(now + Duration::seconds(1), Duration::hours(1)));
    }

    #[test]
    fn test_reads_millisecond_timestamps() {
        let doc: SymbolUniverseDocument = serde_json::from_str(
            r#"{"lastUpdate":"2021-05-01T10:20:30.123Z","symbols":["BTC/USDT","ETH/USDT"]}"#,
        )
        .unwrap();
        assert_eq!(doc.symbols.len(), 2);
    }

    #[test]
    fn test_symbol_helpers() {
        assert_eq!(exchange_symbol_id("BTC/USDT"), "BTCUSDT");
        assert_eq!(unified_symbol("eth", "usdt"), "ETH/USDT");
        assert_eq!(base_asset("ETH/BTC"), "ETH");
    }
}
