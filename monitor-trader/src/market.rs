use crate::client::{BinanceClient, MarketInfo};
use async_trait::async_trait;
use chrono::Duration;
use monitor_core::{
    exchange_symbol_id, unified_symbol, Clock, DocumentStore, MarketDataSource, Result,
    SymbolUniverseDocument, TickerSnapshot,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LEVERAGED_MARKERS: [&str; 4] = ["UP", "DOWN", "BULL", "BEAR"];

/// Binance-backed market data for the change analyzer.
///
/// The tracked universe is cached in the `symbols` document and refreshed
/// from `exchangeInfo` once it is older than the configured age.
pub struct BinanceMarketData {
    client: Arc<BinanceClient>,
    store: DocumentStore,
    clock: Arc<dyn Clock>,
    universe_max_age: Duration,
}

impl BinanceMarketData {
    pub fn new(
        client: Arc<BinanceClient>,
        store: DocumentStore,
        clock: Arc<dyn Clock>,
        universe_max_age_minutes: i64,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            universe_max_age: Duration::minutes(universe_max_age_minutes),
        }
    }

    /// Full normalized snapshot of the tracked universe.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, TickerSnapshot>> {
        let symbols = self.tracked_symbols().await?;
        self.fetch_tickers(&symbols).await
    }

    async fn refresh_universe(&self) -> Result<Vec<String>> {
        let markets = self.client.exchange_info().await?;
        let config = self.client.config();
        let symbols = select_universe(&markets, &config.quote_asset, &config.excluded_symbols);

        let doc = SymbolUniverseDocument::new(self.clock.now(), symbols.clone());
        if let Err(e) = self.store.save_symbol_universe(&doc).await {
            warn!("Failed to cache symbol universe: {}", e);
        }

        info!("Refreshed symbol universe: {} symbols", symbols.len());
        Ok(symbols)
    }
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    async fn tracked_symbols(&self) -> Result<Vec<String>> {
        match self.store.load_symbol_universe().await {
            Ok(doc) if !doc.is_stale(self.clock.now(), self.universe_max_age) => Ok(doc.symbols),
            Ok(_) => {
                debug!("Cached symbol universe is stale");
                self.refresh_universe().await
            }
            Err(e) => {
                debug!("No usable cached symbol universe: {}", e);
                self.refresh_universe().await
            }
        }
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<BTreeMap<String, TickerSnapshot>> {
        let wanted: HashMap<String, &String> = symbols
            .iter()
            .map(|s| (exchange_symbol_id(s), s))
            .collect();

        let tickers = self.client.tickers_24h().await?;
        Ok(collect_tickers(&wanted, tickers))
    }
}

fn collect_tickers(
    wanted: &HashMap<String, &String>,
    tickers: Vec<crate::client::Ticker24h>,
) -> BTreeMap<String, TickerSnapshot> {
    tickers
        .into_iter()
        .filter(|t| !t.is_idle())
        .filter_map(|t| {
            let unified = wanted.get(&t.symbol)?;
            match t.normalize(unified) {
                Some(snapshot) => Some(((*unified).clone(), snapshot)),
                None => {
                    warn!(symbol = %unified, "Dropping malformed ticker");
                    None
                }
            }
        })
        .collect()
}

/// Trading spot markets quoted in `quote`, minus leveraged tokens and the
/// explicit exclusion list.
pub fn select_universe(markets: &[MarketInfo], quote: &str, excluded: &[String]) -> Vec<String> {
    markets
        .iter()
        .filter(|m| m.status == "TRADING" && m.quote_asset.eq_ignore_ascii_case(quote))
        .filter(|m| !LEVERAGED_MARKERS.iter().any(|marker| m.base_asset.contains(marker)))
        .map(|m| unified_symbol(&m.base_asset, &m.quote_asset))
        .filter(|s| !excluded.contains(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Ticker24h;
    use chrono::{DateTime, Utc};
    use monitor_core::{ExchangeConfig, ManualClock, MemoryStore};

    fn market(base: &str, quote: &str, status: &str) -> MarketInfo {
        MarketInfo {
            symbol: format!("{}{}", base, quote),
            status: status.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
        }
    }

    fn ticker(symbol: &str, price: &str, count: i64) -> Ticker24h {
        serde_json::from_value(serde_json::json!({
            "symbol": symbol,
            "lastPrice": price,
            "weightedAvgPrice": price,
            "openPrice": price,
            "highPrice": price,
            "lowPrice": price,
            "volume": "10",
            "priceChangePercent": "0",
            "closeTime": 0,
            "count": count
        }))
        .unwrap()
    }

    #[test]
    fn test_universe_filters() {
        let markets = vec![
            market("BTC", "USDT", "TRADING"),
            market("ETH", "USDT", "TRADING"),
            market("ETH", "BTC", "TRADING"),
            market("BTCUP", "USDT", "TRADING"),
            market("XRPBEAR", "USDT", "TRADING"),
            market("BUSD", "USDT", "TRADING"),
            market("LUNA", "USDT", "BREAK"),
        ];
        let excluded = ExchangeConfig::default().excluded_symbols;

        assert_eq!(
            select_universe(&markets, "USDT", &excluded),
            vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]
        );
    }

    #[test]
    fn test_idle_and_untracked_tickers_are_omitted() {
        let btc = "BTC/USDT".to_string();
        let eth = "ETH/USDT".to_string();
        let wanted: HashMap<String, &String> =
            [("BTCUSDT".to_string(), &btc), ("ETHUSDT".to_string(), &eth)].into_iter().collect();

        let tickers = collect_tickers(
            &wanted,
            vec![
                ticker("BTCUSDT", "100.5", 12),
                ticker("ETHUSDT", "20", 0),
                ticker("DOGEUSDT", "0.1", 50),
            ],
        );

        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers["BTC/USDT"].price, 100.5);
    }

    #[test]
    fn test_malformed_tickers_are_dropped() {
        let btc = "BTC/USDT".to_string();
        let eth = "ETH/USDT".to_string();
        let wanted: HashMap<String, &String> =
            [("BTCUSDT".to_string(), &btc), ("ETHUSDT".to_string(), &eth)].into_iter().collect();

        let tickers = collect_tickers(
            &wanted,
            vec![ticker("BTCUSDT", "", 5), ticker("ETHUSDT", "20", 5)],
        );

        assert!(!tickers.contains_key("BTC/USDT"));
        assert_eq!(tickers["ETH/USDT"].price, 20.0);
    }

    #[tokio::test]
    async fn test_fresh_cached_universe_is_used() {
        let now: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        let store = DocumentStore::new(Arc::new(MemoryStore::new()));
        let cached = SymbolUniverseDocument::new(now - Duration::minutes(90), vec!["BTC/USDT".to_string()]);
        store.save_symbol_universe(&cached).await.unwrap();

        // unroutable endpoint: any network call would fail the test
        let client = BinanceClient::new(ExchangeConfig {
            rest_endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..ExchangeConfig::default()
        })
        .unwrap();
        let source = BinanceMarketData::new(Arc::new(client), store, Arc::new(ManualClock::new(now)), 120);

        assert_eq!(source.tracked_symbols().await.unwrap(), vec!["BTC/USDT".to_string()]);
    }
}
