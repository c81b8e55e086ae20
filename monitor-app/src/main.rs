use anyhow::{Context, Result};
use clap::Parser;
use monitor_anomaly::{ChangeAnalyzer, CycleScheduler};
use monitor_config::ConfigManager;
use monitor_core::{
    unified_symbol, DocumentStore, JsonFileStore, MarketDataSource, MonitorConfig, SystemClock,
};
use monitor_notifier::{NotificationManager, TelegramNotifier};
use monitor_trader::{BinanceClient, BinanceMarketData, OrderExecutor, Quantity};
use serde_json::json;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Binance spot helper and price/volume change monitor", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = monitor_config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print non-empty balances
    #[arg(long)]
    balance: bool,

    /// Print the last price of TOKEN against USDT
    #[arg(long, value_name = "TOKEN")]
    price: Option<String>,

    /// Print the normalized ticker of TOKEN against USDT
    #[arg(long, value_name = "TOKEN")]
    ticker: Option<String>,

    /// Buy TOKEN
    #[arg(long, value_name = "TOKEN")]
    buy: Option<String>,

    /// Amount of the quote asset to spend on a buy
    #[arg(long)]
    spend: Option<f64>,

    /// Quote asset to buy with
    #[arg(long, value_name = "QUOTE")]
    with: Option<String>,

    /// Sell TOKEN, or ALL to sell every holding
    #[arg(long, value_name = "TOKEN")]
    sell: Option<String>,

    /// Quote asset to sell or convert into
    #[arg(long, value_name = "QUOTE")]
    to: Option<String>,

    /// Order or conversion quantity; sells also accept a percentage such as 50%
    #[arg(long)]
    quantity: Option<String>,

    /// Limit price
    #[arg(long, value_name = "PRICE")]
    at: Option<f64>,

    /// Convert a quantity of TOKEN into the --to asset
    #[arg(long, value_name = "TOKEN")]
    convert: Option<String>,

    /// Watch the market and alert on abnormal price or volume changes
    #[arg(long)]
    listen: bool,

    /// Fetch and print a full normalized market snapshot
    #[arg(long)]
    test: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Balance,
    Price(String),
    Ticker(String),
    Buy {
        symbol: String,
        quantity: Option<f64>,
        spend: Option<f64>,
        at: Option<f64>,
    },
    Sell {
        symbol: String,
        quantity: Quantity,
        at: Option<f64>,
    },
    SellAll {
        quote: String,
    },
    Convert {
        base: String,
        quote: String,
        quantity: f64,
    },
    Listen,
    Test,
}

impl Args {
    /// The first requested action wins. `None` when nothing was asked for.
    fn command(&self, default_quote: &str) -> Result<Option<Command>> {
        let command = if self.balance {
            Command::Balance
        } else if let Some(token) = &self.price {
            Command::Price(unified_symbol(token, default_quote))
        } else if let Some(token) = &self.ticker {
            Command::Ticker(unified_symbol(token, default_quote))
        } else if let Some(token) = &self.buy {
            let quote = self.with.as_deref().unwrap_or(default_quote);
            Command::Buy {
                symbol: unified_symbol(token, quote),
                quantity: self.absolute_quantity()?,
                spend: self.spend,
                at: self.at,
            }
        } else if let Some(token) = &self.sell {
            let quote = self.to.as_deref().unwrap_or(default_quote);
            if token.eq_ignore_ascii_case("ALL") {
                Command::SellAll {
                    quote: quote.to_uppercase(),
                }
            } else {
                let quantity = match &self.quantity {
                    Some(raw) => raw.parse()?,
                    None => Quantity::default(),
                };
                Command::Sell {
                    symbol: unified_symbol(token, quote),
                    quantity,
                    at: self.at,
                }
            }
        } else if let Some(token) = &self.convert {
            Command::Convert {
                base: token.to_uppercase(),
                quote: self.to.as_deref().unwrap_or(default_quote).to_uppercase(),
                quantity: self.absolute_quantity()?.unwrap_or(1.0),
            }
        } else if self.listen {
            Command::Listen
        } else if self.test {
            Command::Test
        } else {
            return Ok(None);
        };

        Ok(Some(command))
    }

    fn absolute_quantity(&self) -> Result<Option<f64>> {
        self.quantity
            .as_deref()
            .map(|raw| {
                raw.trim()
                    .parse::<f64>()
                    .with_context(|| format!("invalid quantity '{}'", raw))
            })
            .transpose()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    init_logging(args.debug);

    let manager = ConfigManager::from_file(&args.config)?;
    manager.validate()?;
    let config = manager.into_config();

    let Some(command) = args.command(&config.exchange.quote_asset)? else {
        info!("No action requested");
        return Ok(());
    };

    let client = Arc::new(BinanceClient::new(config.exchange.clone())?);
    let executor = OrderExecutor::new(client.clone(), config.exchange.quote_asset.clone());

    match command {
        Command::Balance => print_json(&executor.get_balances().await?)?,
        Command::Price(symbol) => println!("{}", executor.get_price(&symbol).await?),
        Command::Ticker(symbol) => print_json(&executor.get_ticker(&symbol).await?)?,
        Command::Buy {
            symbol,
            quantity,
            spend,
            at,
        } => {
            let receipt = match at {
                Some(price) => executor.buy_limit(&symbol, quantity, spend, price).await?,
                None => executor.buy_market(&symbol, quantity, spend).await?,
            };
            print_json(&receipt)?;
        }
        Command::Sell {
            symbol,
            quantity,
            at,
        } => print_json(&executor.sell(&symbol, quantity, at).await?)?,
        Command::SellAll { quote } => {
            let entries: Vec<_> = executor
                .sell_all(&quote)
                .await?
                .into_iter()
                .map(|entry| match entry.result {
                    Ok(receipt) => json!({ "asset": entry.asset, "order": receipt }),
                    Err(e) => json!({ "asset": entry.asset, "error": e.to_string() }),
                })
                .collect();
            print_json(&entries)?;
        }
        Command::Convert {
            base,
            quote,
            quantity,
        } => println!("{}", executor.calculate_conversion(&base, &quote, quantity).await?),
        Command::Listen => listen(&config, client).await?,
        Command::Test => {
            let source = market_source(&config, client);
            print_json(&source.snapshot().await?)?;
        }
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let env_filter = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn document_store(config: &MonitorConfig) -> DocumentStore {
    DocumentStore::new(Arc::new(JsonFileStore::new(config.storage.data_dir.clone())))
}

fn market_source(config: &MonitorConfig, client: Arc<BinanceClient>) -> BinanceMarketData {
    BinanceMarketData::new(
        client,
        document_store(config),
        Arc::new(SystemClock),
        config.analyzer.universe_max_age_minutes,
    )
}

fn build_notifier(config: &MonitorConfig) -> Result<NotificationManager> {
    let mut manager = NotificationManager::new();
    let telegram = &config.notification.telegram;

    if telegram.enabled {
        manager.add_channel(Box::new(TelegramNotifier::new(telegram.clone())?));
    } else {
        warn!("Telegram notifications disabled; alerts will only be logged");
    }

    Ok(manager)
}

async fn listen(config: &MonitorConfig, client: Arc<BinanceClient>) -> Result<()> {
    let source: Arc<dyn MarketDataSource> = Arc::new(market_source(config, client));
    let analyzer = Arc::new(ChangeAnalyzer::new(
        source,
        document_store(config),
        Arc::new(build_notifier(config)?),
        Arc::new(SystemClock),
        &config.analyzer,
        config.trend.clone(),
    ));

    let mut scheduler = CycleScheduler::new(
        analyzer,
        Duration::from_secs(config.analyzer.poll_interval_secs),
    );
    scheduler.start().await?;
    info!("Listening for price and volume changes");

    shutdown_signal().await?;

    scheduler.stop();
    info!("Crypto Monitor stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate.recv() => {
                info!("Received terminate signal, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(argv: &[&str]) -> Option<Command> {
        let mut full = vec!["crypto-monitor"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap().command("USDT").unwrap()
    }

    #[test]
    fn test_no_flags_is_a_noop() {
        assert_eq!(command(&[]), None);
        assert_eq!(command(&["--debug"]), None);
    }

    #[test]
    fn test_first_matching_flag_wins() {
        assert_eq!(command(&["--listen", "--balance"]), Some(Command::Balance));
        assert_eq!(
            command(&["--test", "--price", "btc"]),
            Some(Command::Price("BTC/USDT".to_string()))
        );
        assert_eq!(command(&["--test", "--listen"]), Some(Command::Listen));
    }

    #[test]
    fn test_buy_arguments() {
        assert_eq!(
            command(&["--buy", "eth", "--with", "btc", "--spend", "0.1", "--at", "0.05"]),
            Some(Command::Buy {
                symbol: "ETH/BTC".to_string(),
                quantity: None,
                spend: Some(0.1),
                at: Some(0.05),
            })
        );
    }

    #[test]
    fn test_sell_arguments() {
        assert_eq!(
            command(&["--sell", "eth"]),
            Some(Command::Sell {
                symbol: "ETH/USDT".to_string(),
                quantity: Quantity::Percent(100.0),
                at: None,
            })
        );
        assert_eq!(
            command(&["--sell", "eth", "--quantity", "50%", "--to", "btc"]),
            Some(Command::Sell {
                symbol: "ETH/BTC".to_string(),
                quantity: Quantity::Percent(50.0),
                at: None,
            })
        );
        assert_eq!(
            command(&["--sell", "ALL", "--to", "busd"]),
            Some(Command::SellAll {
                quote: "BUSD".to_string()
            })
        );
    }

    #[test]
    fn test_convert_defaults_to_one_unit() {
        assert_eq!(
            command(&["--convert", "usdt", "--to", "btc"]),
            Some(Command::Convert {
                base: "USDT".to_string(),
                quote: "BTC".to_string(),
                quantity: 1.0,
            })
        );
    }

    #[test]
    fn test_invalid_quantity_is_reported() {
        let args = Args::try_parse_from(["crypto-monitor", "--buy", "eth", "--quantity", "lots"]).unwrap();
        assert!(args.command("USDT").is_err());
    }
}
