use crate::{
    Balance, OrderReceipt, OrderRequest, OrderSide, Quantity, SellAllEntry, SpotExchange,
};
use futures::future::join_all;
use monitor_core::{base_asset, unified_symbol, MonitorError, Result, TickerSnapshot};
use std::sync::Arc;
use tracing::{info, warn};

/// Prefix of Binance Earn balances, which cannot be traded directly.
const EARN_ASSET_PREFIX: &str = "LD";

/// Manual spot order operations behind the command line.
pub struct OrderExecutor {
    exchange: Arc<dyn SpotExchange>,
    quote_asset: String,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn SpotExchange>, quote_asset: impl Into<String>) -> Self {
        Self {
            exchange,
            quote_asset: quote_asset.into().to_uppercase(),
        }
    }

    pub async fn get_balances(&self) -> Result<Vec<Balance>> {
        self.exchange.balances().await
    }

    pub async fn get_price(&self, symbol: &str) -> Result<f64> {
        Ok(self.exchange.ticker(symbol).await?.price)
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        self.exchange.ticker(symbol).await
    }

    /// Market buy of `quantity`, or of `spend / current price` when only a
    /// quote amount is given.
    pub async fn buy_market(&self, symbol: &str, quantity: Option<f64>, spend: Option<f64>) -> Result<OrderReceipt> {
        let quantity = match (quantity, spend) {
            (Some(quantity), _) => quantity,
            (None, Some(spend)) => {
                let price = self.get_price(symbol).await?;
                if price <= 0.0 {
                    return Err(MonitorError::InvalidOrder(format!("no price available for {}", symbol)));
                }
                spend / price
            }
            (None, None) => {
                return Err(MonitorError::InvalidOrder(
                    "market buy needs a quantity or an amount to spend".to_string(),
                ))
            }
        };

        self.submit(OrderRequest::market(symbol, OrderSide::Buy, ensure_positive(quantity)?))
            .await
    }

    /// Limit buy at `price` of `quantity`, or of `spend / price`.
    pub async fn buy_limit(&self, symbol: &str, quantity: Option<f64>, spend: Option<f64>, price: f64) -> Result<OrderReceipt> {
        let price = ensure_positive(price)?;
        let quantity = match (quantity, spend) {
            (Some(quantity), _) => quantity,
            (None, Some(spend)) => spend / price,
            (None, None) => {
                return Err(MonitorError::InvalidOrder(
                    "limit buy needs a quantity or an amount to spend".to_string(),
                ))
            }
        };

        self.submit(OrderRequest::limit(symbol, OrderSide::Buy, ensure_positive(quantity)?, price))
            .await
    }

    /// Sell part of the free balance of the symbol's base asset. Limit order
    /// when `at` is given, market otherwise.
    pub async fn sell(&self, symbol: &str, quantity: Quantity, at: Option<f64>) -> Result<OrderReceipt> {
        let asset = base_asset(symbol);
        let free = self.free_balance(asset).await?;
        self.sell_from_balance(symbol, free, quantity, at).await
    }

    /// Sell every tradable holding into `quote`. One failing asset never
    /// stops the others.
    pub async fn sell_all(&self, quote: &str) -> Result<Vec<SellAllEntry>> {
        let quote = quote.to_uppercase();
        let balances = self.get_balances().await?;

        let sales = balances
            .into_iter()
            .filter(|b| b.asset != quote && b.asset != self.quote_asset)
            .filter(|b| !b.asset.starts_with(EARN_ASSET_PREFIX))
            .map(|balance| {
                let quote = quote.clone();
                async move {
                    let symbol = unified_symbol(&balance.asset, &quote);
                    let result = self
                        .sell_from_balance(&symbol, balance.free, Quantity::default(), None)
                        .await;
                    if let Err(e) = &result {
                        warn!("Failed to sell {}: {}", balance.asset, e);
                    }
                    SellAllEntry {
                        asset: balance.asset,
                        result,
                    }
                }
            });

        Ok(join_all(sales).await)
    }

    /// Value of `quantity` units of `base` expressed in `quote`. Quote-asset
    /// amounts are converted through the inverse pair.
    pub async fn calculate_conversion(&self, base: &str, quote: &str, quantity: f64) -> Result<f64> {
        let base = base.to_uppercase();
        let quote = quote.to_uppercase();

        if base == self.quote_asset {
            let price = self.get_price(&unified_symbol(&quote, &base)).await?;
            if price <= 0.0 {
                return Err(MonitorError::InvalidOrder(format!("no price available for {}/{}", quote, base)));
            }
            Ok(quantity / price)
        } else {
            let price = self.get_price(&unified_symbol(&base, &quote)).await?;
            Ok(price * quantity)
        }
    }

    async fn free_balance(&self, asset: &str) -> Result<f64> {
        Ok(self
            .get_balances()
            .await?
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(0.0))
    }

    async fn sell_from_balance(&self, symbol: &str, free: f64, quantity: Quantity, at: Option<f64>) -> Result<OrderReceipt> {
        if free <= 0.0 {
            return Err(MonitorError::InsufficientBalance(base_asset(symbol).to_string()));
        }

        let amount = ensure_positive(quantity.resolve(free))?;
        let request = match at {
            Some(price) => OrderRequest::limit(symbol, OrderSide::Sell, amount, ensure_positive(price)?),
            None => OrderRequest::market(symbol, OrderSide::Sell, amount),
        };
        self.submit(request).await
    }

    async fn submit(&self, request: OrderRequest) -> Result<OrderReceipt> {
        let receipt = self.exchange.place_order(request).await?;
        info!(
            "Order {} placed: {} {} {} ({})",
            receipt.id,
            receipt.side.as_str(),
            receipt.quantity,
            receipt.symbol,
            receipt.status
        );
        Ok(receipt)
    }
}

fn ensure_positive(value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(MonitorError::InvalidOrder(format!("amount must be positive, got {}", value)))
    }
}
