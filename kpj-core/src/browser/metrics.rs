use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationMetrics {
    pub scripts_dispatched: u64,
    pub results_delivered: u64,
    pub deliveries_dropped: u64,
    pub requests_abandoned: u64,
    pub attempts: u64,
    pub attempt_timeouts: u64,
    pub fallback_matches: u64,
    pub extractions: u64,
}

impl AutomationMetrics {
    pub fn record_dispatch(&mut self) {
        self.scripts_dispatched = self.scripts_dispatched.saturating_add(1);
    }

    pub fn record_delivery(&mut self, matched: bool) {
        if matched {
            self.results_delivered = self.results_delivered.saturating_add(1);
        } else {
            self.deliveries_dropped = self.deliveries_dropped.saturating_add(1);
        }
    }

    pub fn record_abandoned(&mut self, count: u64) {
        self.requests_abandoned = self.requests_abandoned.saturating_add(count);
    }

    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn record_timeout(&mut self) {
        self.attempt_timeouts = self.attempt_timeouts.saturating_add(1);
    }

    pub fn record_fallback(&mut self) {
        self.fallback_matches = self.fallback_matches.saturating_add(1);
    }

    pub fn record_extraction(&mut self) {
        self.extractions = self.extractions.saturating_add(1);
    }

    pub fn delivery_rate(&self) -> f64 {
        if self.scripts_dispatched == 0 {
            0.0
        } else {
            (self.results_delivered as f64 / self.scripts_dispatched as f64) * 100.0
        }
    }
}
