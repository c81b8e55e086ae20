use crate::{Balance, OrderReceipt, OrderRequest, OrderSide, OrderType, SpotExchange};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use monitor_core::{exchange_symbol_id, DailyStats, ExchangeConfig, MonitorError, Result, TickerSnapshot};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const INVALID_SYMBOL_CODE: i64 = -1121;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<MarketInfo>,
}

/// `GET /api/v3/ticker/24hr` entry. Decimals arrive as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: String,
    pub weighted_avg_price: String,
    pub open_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub price_change_percent: String,
    pub close_time: i64,
    #[serde(default)]
    pub count: i64,
}

impl Ticker24h {
    /// No trades inside the rolling window.
    pub fn is_idle(&self) -> bool {
        self.count == 0
    }

    /// `None` unless the last price is a positive decimal and the volume a
    /// non-negative one.
    pub fn normalize(&self, unified: &str) -> Option<TickerSnapshot> {
        let price = parse_decimal(&self.last_price).filter(|p| *p > 0.0)?;
        let volume = parse_decimal(&self.volume).filter(|v| *v >= 0.0)?;

        Some(TickerSnapshot {
            symbol: unified.to_string(),
            datetime: millis_to_datetime(self.close_time),
            price,
            vwap: parse_decimal(&self.weighted_avg_price),
            volume,
            h24: DailyStats {
                open: parse_f64(&self.open_price),
                high: parse_f64(&self.high_price),
                low: parse_f64(&self.low_price),
                change: parse_f64(&self.price_change_percent),
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderResponse {
    order_id: i64,
    client_order_id: String,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    price: String,
    #[serde(default)]
    orig_qty: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    cummulative_quote_qty: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Thin Binance spot REST client.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    config: ExchangeConfig,
    http: Client,
}

impl BinanceClient {
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub async fn exchange_info(&self) -> Result<Vec<MarketInfo>> {
        let info: ExchangeInfoResponse = self.public_get_json("/api/v3/exchangeInfo", &[]).await?;
        Ok(info.symbols)
    }

    pub async fn tickers_24h(&self) -> Result<Vec<Ticker24h>> {
        self.public_get_json("/api/v3/ticker/24hr", &[]).await
    }

    pub async fn ticker_24h(&self, symbol: &str) -> Result<Ticker24h> {
        let id = exchange_symbol_id(symbol);
        self.public_get_json("/api/v3/ticker/24hr", &[("symbol", id.as_str())])
            .await
    }

    pub async fn account_balances(&self) -> Result<Vec<Balance>> {
        let account: AccountResponse = self.signed_get_json("/api/v3/account", Vec::new()).await?;

        Ok(account
            .balances
            .into_iter()
            .map(|raw| Balance {
                asset: raw.asset,
                free: parse_f64(&raw.free),
                locked: parse_f64(&raw.locked),
            })
            .filter(|b| b.free > 0.0 || b.locked > 0.0)
            .collect())
    }

    pub async fn new_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let params = order_params(request)?;
        debug!(symbol = %request.symbol, side = request.side.as_str(), "Submitting order");

        let raw: RawOrderResponse = self.signed_post_json("/api/v3/order", params).await?;
        Ok(OrderReceipt {
            id: raw.order_id.to_string(),
            client_order_id: raw.client_order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: raw.status,
            price: parse_f64(&raw.price),
            quantity: parse_f64(&raw.orig_qty),
            filled: parse_f64(&raw.executed_qty),
            cost: parse_f64(&raw.cummulative_quote_qty),
            timestamp: raw.transact_time.and_then(millis_to_datetime),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.rest_endpoint.trim_end_matches('/'), path)
    }

    async fn public_get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let resp = self.http.get(self.url(path)).query(params).send().await?;
        Self::decode(path, resp).await
    }

    async fn signed_get_json<T: DeserializeOwned>(&self, path: &str, params: Vec<(String, String)>) -> Result<T> {
        let query = self.signed_query(params)?;
        let resp = self
            .http
            .get(format!("{}?{}", self.url(path), query))
            .headers(self.auth_headers()?)
            .send()
            .await?;
        Self::decode(path, resp).await
    }

    async fn signed_post_json<T: DeserializeOwned>(&self, path: &str, params: Vec<(String, String)>) -> Result<T> {
        let body = self.signed_query(params)?;
        let mut headers = self.auth_headers()?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let resp = self
            .http
            .post(self.url(path))
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Self::decode(path, resp).await
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> Result<String> {
        if !self.config.has_credentials() {
            return Err(MonitorError::Configuration(
                "missing API credentials for signed request".to_string(),
            ));
        }

        params.push(("recvWindow".to_string(), self.config.recv_window_ms.to_string()));
        params.push(("timestamp".to_string(), Utc::now().timestamp_millis().to_string()));

        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| MonitorError::Other(format!("failed to encode params: {}", e)))?;
        let signature = sign_payload(&self.config.api_secret, &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|_| MonitorError::Configuration("API key is not a valid header value".to_string()))?,
        );
        Ok(headers)
    }

    async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let payload = resp.text().await?;

        if !status.is_success() {
            warn!(endpoint = path, status = status.as_u16(), "Exchange request failed");
            return Err(api_error(status.as_u16(), payload));
        }
        Ok(serde_json::from_str(&payload)?)
    }
}

#[async_trait]
impl SpotExchange for BinanceClient {
    async fn balances(&self) -> Result<Vec<Balance>> {
        self.account_balances().await
    }

    async fn ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        self.ticker_24h(symbol)
            .await?
            .normalize(symbol)
            .ok_or_else(|| MonitorError::Other(format!("malformed ticker for {}", symbol)))
    }

    async fn place_order(&self, request: OrderRequest) -> Result<OrderReceipt> {
        self.new_order(&request).await
    }
}

fn order_params(request: &OrderRequest) -> Result<Vec<(String, String)>> {
    let mut params = vec![
        ("symbol".to_string(), exchange_symbol_id(&request.symbol)),
        ("side".to_string(), request.side.as_str().to_string()),
        ("type".to_string(), request.order_type.as_str().to_string()),
        ("quantity".to_string(), format_decimal(request.quantity)),
    ];

    if request.order_type == OrderType::Limit {
        let price = request
            .price
            .ok_or_else(|| MonitorError::InvalidOrder("limit order requires a price".to_string()))?;
        params.push(("timeInForce".to_string(), "GTC".to_string()));
        params.push(("price".to_string(), format_decimal(price)));
    }
    if request.side == OrderSide::Buy && request.order_type == OrderType::Market {
        params.push(("newOrderRespType".to_string(), "RESULT".to_string()));
    }

    Ok(params)
}

fn api_error(code: u16, body: String) -> MonitorError {
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(err) if err.code == INVALID_SYMBOL_CODE => MonitorError::UnknownSymbol(err.msg),
        _ => MonitorError::Exchange { code, body },
    }
}

pub(crate) fn sign_payload(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MonitorError::Configuration(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Fixed 8-decimal rendering with trailing zeros removed.
pub(crate) fn format_decimal(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn parse_decimal(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_f64(value: &str) -> f64 {
    parse_decimal(value).unwrap_or(0.0)
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticker(count: i64) -> Ticker24h {
        serde_json::from_value(serde_json::json!({
            "symbol": "BTCUSDT",
            "priceChange": "-94.99999800",
            "priceChangePercent": "-1.25",
            "weightedAvgPrice": "7552.1",
            "prevClosePrice": "7600.0",
            "lastPrice": "7505.00",
            "openPrice": "7600.00",
            "highPrice": "7700.00",
            "lowPrice": "7400.50",
            "volume": "1234.5",
            "quoteVolume": "9300000.0",
            "openTime": 1709208000000i64,
            "closeTime": 1709294400000i64,
            "count": count
        }))
        .unwrap()
    }

    #[test]
    fn test_signature_matches_exchange_reference() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_payload(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_ticker_normalization() {
        let ticker = sample_ticker(42);
        assert!(!ticker.is_idle());

        let snapshot = ticker.normalize("BTC/USDT").unwrap();
        assert_eq!(snapshot.symbol, "BTC/USDT");
        assert_eq!(snapshot.price, 7505.0);
        assert_eq!(snapshot.volume, 1234.5);
        assert_eq!(snapshot.vwap, Some(7552.1));
        assert_eq!(snapshot.h24.low, 7400.5);
        assert_eq!(snapshot.h24.change, -1.25);
        assert_eq!(snapshot.datetime.unwrap().timestamp_millis(), 1709294400000);

        assert!(sample_ticker(0).is_idle());
    }

    #[test]
    fn test_unparseable_price_is_rejected() {
        let mut ticker = sample_ticker(5);
        ticker.last_price = String::new();
        assert!(ticker.normalize("BTC/USDT").is_none());

        ticker.last_price = "0.00000000".to_string();
        assert!(ticker.normalize("BTC/USDT").is_none());

        ticker.last_price = "7505.00".to_string();
        ticker.volume = "n/a".to_string();
        assert!(ticker.normalize("BTC/USDT").is_none());
    }

    #[test]
    fn test_limit_order_params() {
        let request = OrderRequest::limit("ETH/USDT", OrderSide::Sell, 0.25, 3100.5);
        let params = order_params(&request).unwrap();
        let query = serde_urlencoded::to_string(&params).unwrap();
        assert_eq!(
            query,
            "symbol=ETHUSDT&side=SELL&type=LIMIT&quantity=0.25&timeInForce=GTC&price=3100.5"
        );

        let mut missing_price = request;
        missing_price.price = None;
        assert!(order_params(&missing_price).is_err());
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1.0), "1");
        assert_eq!(format_decimal(0.1 + 0.2), "0.3");
        assert_eq!(format_decimal(0.000012346), "0.00001235");
    }

    #[test]
    fn test_api_error_mapping() {
        let err = api_error(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#.to_string());
        assert!(matches!(err, MonitorError::UnknownSymbol(msg) if msg == "Invalid symbol."));

        let err = api_error(418, "banned".to_string());
        assert!(matches!(err, MonitorError::Exchange { code: 418, .. }));
    }

    #[test]
    fn test_signed_requests_need_credentials() {
        let client = BinanceClient::new(ExchangeConfig::default()).unwrap();
        assert!(matches!(
            client.signed_query(Vec::new()),
            Err(MonitorError::Configuration(_))
        ));
    }
}
