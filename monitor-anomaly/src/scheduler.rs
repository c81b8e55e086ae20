use crate::{analyzer::ChangeAnalyzer, CycleOutcome};
use monitor_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

/// Fires [`ChangeAnalyzer::run_cycle`] on a fixed period until stopped.
///
/// Every tick spawns its cycle as a separate task, so a hung fetch never
/// delays the timer. The analyzer's in-progress guard turns overlapping
/// ticks into skips.
pub struct CycleScheduler {
    analyzer: Arc<ChangeAnalyzer>,
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl CycleScheduler {
    pub fn new(analyzer: Arc<ChangeAnalyzer>, period: Duration) -> Self {
        Self {
            analyzer,
            period,
            handle: None,
        }
    }

    /// Clear the stored market snapshot so the first cycle re-baselines, then
    /// start ticking. The first cycle runs one period after start.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            info!("Cycle scheduler already running");
            return Ok(());
        }

        self.analyzer.store().clear_market_snapshot().await?;
        self.analyzer.reset_tracking();

        let analyzer = self.analyzer.clone();
        let period = self.period;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let analyzer = analyzer.clone();
                tokio::spawn(async move {
                    match analyzer.run_cycle().await {
                        Ok(CycleOutcome::Analyzed { evaluated, alerts }) => {
                            info!("Cycle done: {} symbols evaluated, {} alerts", evaluated, alerts.len());
                        }
                        Ok(_) => {}
                        Err(e) => error!("Analyzer cycle failed: {}", e),
                    }
                });
            }
        }));

        info!("Cycle scheduler started with a {:?} period", self.period);
        Ok(())
    }

    /// Stop future ticks. A cycle already in flight runs to completion.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Cycle scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingNotifier, ScriptedSource};
    use monitor_core::{
        AnalyzerConfig, DocumentStore, ManualClock, MarketSnapshotDocument, MemoryStore,
        TrendConfig,
    };
    use std::collections::BTreeMap;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn analyzer(source: Arc<ScriptedSource>, store: DocumentStore) -> Arc<ChangeAnalyzer> {
        Arc::new(ChangeAnalyzer::new(
            source,
            store,
            Arc::new(RecordingNotifier::default()),
            Arc::new(ManualClock::new("2024-03-01T12:00:00Z".parse().unwrap())),
            &AnalyzerConfig::default(),
            TrendConfig::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_clears_snapshot_and_ticks() {
        let source = Arc::new(ScriptedSource::new());
        source.set("BTC/USDT", 100.0, 10.0);

        let store = DocumentStore::new(Arc::new(MemoryStore::new()));
        let old = MarketSnapshotDocument::new(
            "2024-03-01T11:59:00Z".parse().unwrap(),
            BTreeMap::new(),
        );
        store.save_market_snapshot(&old).await.unwrap();

        let mut scheduler = CycleScheduler::new(analyzer(source.clone(), store.clone()), Duration::from_secs(20));
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(store.load_market_snapshot().await.unwrap_err().is_absent());

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(store.load_market_snapshot().await.unwrap().data.len(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_future_ticks() {
        let source = Arc::new(ScriptedSource::new());
        source.set("BTC/USDT", 100.0, 10.0);
        let store = DocumentStore::new(Arc::new(MemoryStore::new()));

        let mut scheduler = CycleScheduler::new(analyzer(source.clone(), store), Duration::from_secs(20));
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 1);

        scheduler.stop();
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_keeps_scheduler_alive() {
        let source = Arc::new(ScriptedSource::new());
        source.set("BTC/USDT", 100.0, 10.0);
        source.fail(true);
        let store = DocumentStore::new(Arc::new(MemoryStore::new()));

        let mut scheduler = CycleScheduler::new(analyzer(source.clone(), store.clone()), Duration::from_secs(20));
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 1);
        assert!(scheduler.is_running());

        source.fail(false);
        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(source.fetch_count(), 2);
        assert!(store.load_market_snapshot().await.is_ok());
    }
}
