pub mod analyzer;
pub mod scheduler;
pub mod tracker;

use chrono::{DateTime, Utc};
use std::fmt;

pub use analyzer::ChangeAnalyzer;
pub use scheduler::CycleScheduler;
pub use tracker::TrendTracker;

/// Per-symbol memory of the last *alerted* changes. Not persisted.
///
/// The default value is the baseline used for symbols that never alerted:
/// zero change, updated at the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackedSymbolState {
    pub price_change: f64,
    pub price_updated: DateTime<Utc>,
    pub volume_change: f64,
    pub volume_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeAlert {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Minutes since the snapshot the change was measured against.
    pub minutes_elapsed: i64,
    pub messages: Vec<String>,
}

impl fmt::Display for ChangeAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} in the last {} mins",
            self.symbol,
            self.messages.join(" and "),
            self.minutes_elapsed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The stored snapshot was missing or stale and has been replaced.
    Rebaselined { symbols: usize },
    Analyzed {
        evaluated: usize,
        alerts: Vec<ChangeAlert>,
    },
    /// Another cycle was still in flight.
    Skipped,
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use monitor_core::{MarketDataSource, MonitorError, Notifier, Result, TickerSnapshot};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Default)]
    pub struct ScriptedSource {
        tickers: Mutex<BTreeMap<String, TickerSnapshot>>,
        fail: AtomicBool,
        pub fetches: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub fn set(&self, symbol: &str, price: f64, volume: f64) {
            self.tickers
                .lock()
                .insert(symbol.to_string(), TickerSnapshot::new(symbol, price, volume));
        }

        pub fn remove(&self, symbol: &str) {
            self.tickers.lock().remove(symbol);
        }

        pub fn fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn tracked_symbols(&self) -> Result<Vec<String>> {
            Ok(self.tickers.lock().keys().cloned().collect())
        }

        async fn fetch_tickers(&self, symbols: &[String]) -> Result<BTreeMap<String, TickerSnapshot>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(MonitorError::Other("exchange unavailable".to_string()));
            }
            let tickers = self.tickers.lock();
            Ok(symbols
                .iter()
                .filter_map(|s| tickers.get(s).map(|t| (s.clone(), t.clone())))
                .collect())
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str) {
            self.sent.lock().push(text.to_string());
        }
    }
}
