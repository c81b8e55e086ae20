use crate::{tracker::TrendTracker, ChangeAlert, CycleOutcome, TrackedSymbolState};
use chrono::{DateTime, Duration, Utc};
use monitor_core::{
    AnalyzerConfig, Clock, DocumentStore, MarketDataSource, MarketSnapshotDocument, Notifier,
    Result, TickerSnapshot, TrendConfig,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs one polling cycle: compare a fresh snapshot against the stored one
/// and dispatch whatever the trend tracker considers alert-worthy.
pub struct ChangeAnalyzer {
    source: Arc<dyn MarketDataSource>,
    store: DocumentStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    tracker: Mutex<TrendTracker>,
    snapshot_max_age: Duration,
    in_progress: AtomicBool,
}

impl ChangeAnalyzer {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: DocumentStore,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        analyzer_config: &AnalyzerConfig,
        trend_config: TrendConfig,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            clock,
            tracker: Mutex::new(TrendTracker::new(trend_config)),
            snapshot_max_age: Duration::minutes(analyzer_config.snapshot_max_age_minutes),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn tracked_state(&self, symbol: &str) -> Option<TrackedSymbolState> {
        self.tracker.lock().state(symbol).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.lock().len()
    }

    pub fn reset_tracking(&self) {
        self.tracker.lock().reset();
    }

    /// Run a single cycle. Returns [`CycleOutcome::Skipped`] when another
    /// cycle is still in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous analyzer cycle still running, skipping this tick");
            return Ok(CycleOutcome::Skipped);
        }
        let _guard = CycleGuard(&self.in_progress);

        let stored = match self.store.load_market_snapshot().await {
            Ok(doc) => Some(doc),
            Err(e) => {
                if e.is_absent() {
                    debug!("No usable market snapshot: {}", e);
                } else {
                    warn!("Failed to read market snapshot, treating as absent: {}", e);
                }
                None
            }
        };

        let symbols = self.source.tracked_symbols().await?;
        let current = self.source.fetch_tickers(&symbols).await?;
        let now = self.clock.now();

        match stored {
            Some(doc) if !doc.is_stale(now, self.snapshot_max_age) => {
                info!("...Analyzing {} symbols", doc.data.len());
                Ok(self.analyze(&doc, &current, now).await)
            }
            _ => Ok(self.rebaseline(current, now).await),
        }
    }

    async fn rebaseline(
        &self,
        current: BTreeMap<String, TickerSnapshot>,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let symbols = current.len();
        info!("Updating symbols-track snapshot with {} symbols", symbols);

        let doc = MarketSnapshotDocument::new(now, current);
        if let Err(e) = self.store.save_market_snapshot(&doc).await {
            warn!("Failed to persist market snapshot: {}", e);
        }
        self.tracker.lock().reset();

        CycleOutcome::Rebaselined { symbols }
    }

    async fn analyze(
        &self,
        stored: &MarketSnapshotDocument,
        current: &BTreeMap<String, TickerSnapshot>,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let elapsed = stored.age(now);
        let minutes_elapsed = (elapsed.num_seconds() as f64 / 60.0).round() as i64;
        let mut evaluated = 0;

        let alerts: Vec<ChangeAlert> = {
            let mut tracker = self.tracker.lock();

            stored
                .data
                .iter()
                .filter_map(|(symbol, previous)| {
                    let Some(latest) = current.get(symbol) else {
                        debug!(%symbol, "no current ticker, skipping");
                        return None;
                    };
                    evaluated += 1;

                    let mut messages = Vec::new();

                    if let Some(change) = percent_change(previous.price, latest.price) {
                        if let Some(message) = tracker.evaluate_price_change(symbol, change, now) {
                            messages.push(message);
                        }
                    }

                    if let Some(change) = percent_change(previous.volume, latest.volume) {
                        if let Some(message) = tracker.evaluate_volume_change(symbol, change, now) {
                            messages.push(message);
                        }
                    }

                    if messages.is_empty() {
                        return None;
                    }

                    Some(ChangeAlert {
                        symbol: symbol.clone(),
                        timestamp: now,
                        minutes_elapsed,
                        messages,
                    })
                })
                .collect()
        };

        for alert in &alerts {
            let text = alert.to_string();
            info!("{}", text);
            self.notifier.notify(&text).await;
        }

        CycleOutcome::Analyzed { evaluated, alerts }
    }
}

/// Percent change from `stored` to `current`, `None` unless both are positive.
fn percent_change(stored: f64, current: f64) -> Option<f64> {
    if stored <= 0.0 || current <= 0.0 || !stored.is_finite() || !current.is_finite() {
        return None;
    }
    Some(current * 100.0 / stored - 100.0)
}

struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
