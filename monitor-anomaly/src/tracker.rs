use crate::TrackedSymbolState;
use chrono::{DateTime, Duration, Utc};
use monitor_core::TrendConfig;
use std::collections::HashMap;
use tracing::debug;

/// Decides whether a freshly computed change is a new alert-worthy event,
/// relative to the last change that was alerted for the same symbol.
///
/// State is only written when an alert fires, so a move that is suppressed by
/// the debounce window is re-evaluated on the next poll.
#[derive(Debug, Clone)]
pub struct TrendTracker {
    config: TrendConfig,
    states: HashMap<String, TrackedSymbolState>,
}

impl TrendTracker {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn evaluate_price_change(
        &mut self,
        symbol: &str,
        price_change: f64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !price_change.is_finite() || price_change.abs() < self.config.price_change_threshold {
            return None;
        }

        let prior = self.states.get(symbol).copied().unwrap_or_default();
        let last = prior.price_change;

        let turned_up = last <= 0.0 && price_change > 0.0;
        let turned_down = last >= 0.0 && price_change < 0.0;
        let moved_further = (last.abs() - price_change.abs()).abs() > self.config.price_reversal_delta;

        if !(turned_up || turned_down || moved_further) {
            return None;
        }

        let window = Duration::minutes(self.config.price_debounce_minutes);
        if now.signed_duration_since(prior.price_updated) < window {
            debug!(
                symbol,
                price_change, last, "price change suppressed by debounce window"
            );
            return None;
        }

        let action = if price_change > 0.0 { "increased" } else { "decreased" };
        let message = format!("Price has {} in {:.2}%", action, price_change);

        let state = self.states.entry(symbol.to_string()).or_default();
        state.price_change = price_change;
        state.price_updated = now;

        Some(message)
    }

    pub fn evaluate_volume_change(
        &mut self,
        symbol: &str,
        volume_change: f64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !volume_change.is_finite() {
            return None;
        }

        let prior = self.states.get(symbol).copied().unwrap_or_default();

        let window = Duration::hours(self.config.volume_debounce_hours);
        if now.signed_duration_since(prior.volume_updated) < window {
            return None;
        }

        if volume_change.abs() < self.config.volume_increase_threshold {
            return None;
        }

        // escalation only
        if volume_change <= prior.volume_change {
            return None;
        }

        let message = format!("Volume increased in {:.2}%", volume_change);

        let state = self.states.entry(symbol.to_string()).or_default();
        state.volume_change = volume_change;
        state.volume_updated = now;

        Some(message)
    }

    pub fn state(&self, symbol: &str) -> Option<&TrackedSymbolState> {
        self.states.get(symbol)
    }

    #[cfg(test)]
    pub(crate) fn restore(&mut self, symbol: impl Into<String>, state: TrackedSymbolState) {
        self.states.insert(symbol.into(), state);
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
