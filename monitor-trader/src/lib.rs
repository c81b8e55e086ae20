pub mod client;
pub mod executor;
pub mod market;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use monitor_core::{MonitorError, Result, TickerSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use client::BinanceClient;
pub use executor::OrderExecutor;
pub use market::BinanceMarketData;

/// Account-level spot operations the order executor needs.
#[async_trait]
pub trait SpotExchange: Send + Sync {
    /// Non-empty balances only.
    async fn balances(&self) -> Result<Vec<Balance>>;
    async fn ticker(&self, symbol: &str) -> Result<TickerSnapshot>;
    async fn place_order(&self, request: OrderRequest) -> Result<OrderReceipt>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Unified symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Required for limit orders.
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: String,
    pub price: f64,
    pub quantity: f64,
    pub filled: f64,
    pub cost: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Sell amount: an absolute quantity or a percentage of the free balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    Absolute(f64),
    Percent(f64),
}

impl Quantity {
    pub fn resolve(&self, free_balance: f64) -> f64 {
        match self {
            Quantity::Absolute(quantity) => *quantity,
            Quantity::Percent(percent) => free_balance * percent / 100.0,
        }
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::Percent(100.0)
    }
}

impl FromStr for Quantity {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || MonitorError::InvalidOrder(format!("invalid quantity '{}'", s));

        let quantity = match s.strip_suffix('%') {
            Some(percent) => {
                let percent: f64 = percent.trim().parse().map_err(|_| invalid())?;
                if percent <= 0.0 || percent > 100.0 {
                    return Err(invalid());
                }
                Quantity::Percent(percent)
            }
            None => {
                let quantity: f64 = s.parse().map_err(|_| invalid())?;
                if quantity <= 0.0 || !quantity.is_finite() {
                    return Err(invalid());
                }
                Quantity::Absolute(quantity)
            }
        };
        Ok(quantity)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Absolute(quantity) => write!(f, "{}", quantity),
            Quantity::Percent(percent) => write!(f, "{}%", percent),
        }
    }
}

/// Per-asset result of a sell-everything request.
#[derive(Debug)]
pub struct SellAllEntry {
    pub asset: String,
    pub result: Result<OrderReceipt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_parsing() {
        assert_eq!("0.5".parse::<Quantity>().unwrap(), Quantity::Absolute(0.5));
        assert_eq!("25%".parse::<Quantity>().unwrap(), Quantity::Percent(25.0));
        assert_eq!(" 100% ".parse::<Quantity>().unwrap(), Quantity::Percent(100.0));

        assert!("abc".parse::<Quantity>().is_err());
        assert!("0".parse::<Quantity>().is_err());
        assert!("-1".parse::<Quantity>().is_err());
        assert!("150%".parse::<Quantity>().is_err());
        assert!("%".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_quantity_resolution() {
        assert_eq!(Quantity::default().resolve(8.0), 8.0);
        assert_eq!(Quantity::Percent(25.0).resolve(8.0), 2.0);
        assert_eq!(Quantity::Absolute(3.0).resolve(8.0), 3.0);
    }

    #[test]
    fn test_order_wire_names() {
        assert_eq!(OrderSide::Sell.as_str(), "SELL");
        assert_eq!(OrderType::Limit.as_str(), "LIMIT");
        assert_eq!(serde_json::to_value(OrderSide::Buy).unwrap(), "BUY");
    }
}
