use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

use crate::browser::{
    lock, AutomationMetrics, BrowserError, ErrorCategorizer, ErrorCategory, ExtractionBundle,
    ItemPipeline,
};
use crate::config::EngineSection;
use crate::validation::IdentifierValidator;

use super::types::{AutomationResult, AutomationStatus, EngineState, EngineStats};

/// Runs the pipeline for one identifier with a per-attempt time budget and a
/// fixed retry schedule.
///
/// Only one identifier is processed at a time; concurrent `process_one` calls
/// queue behind each other.
pub struct AutomationEngine {
    pipeline: Arc<dyn ItemPipeline>,
    validator: Arc<dyn IdentifierValidator>,
    config: EngineSection,
    state: Mutex<EngineState>,
    stats: Mutex<EngineStats>,
    metrics: Arc<Mutex<AutomationMetrics>>,
    worker: tokio::sync::Mutex<()>,
}

impl AutomationEngine {
    pub fn new(
        pipeline: Arc<dyn ItemPipeline>,
        validator: Arc<dyn IdentifierValidator>,
        config: EngineSection,
    ) -> Self {
        Self {
            pipeline,
            validator,
            config,
            state: Mutex::new(EngineState::Idle),
            stats: Mutex::new(EngineStats::default()),
            metrics: Arc::new(Mutex::new(AutomationMetrics::default())),
            worker: tokio::sync::Mutex::new(()),
        }
    }

    /// Shares a metrics handle, typically the bridge's.
    pub fn with_metrics(mut self, metrics: Arc<Mutex<AutomationMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineSection {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        lock(&self.state).clone()
    }

    pub fn stats(&self) -> EngineStats {
        lock(&self.stats).clone()
    }

    pub fn metrics(&self) -> AutomationMetrics {
        lock(&self.metrics).clone()
    }

    /// A fresh engine over the same collaborators: idle, with empty stats.
    pub fn reset(&self) -> AutomationEngine {
        info!("engine reset");
        AutomationEngine::new(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.validator),
            self.config.clone(),
        )
        .with_metrics(Arc::clone(&self.metrics))
    }

    pub(crate) fn transition(&self, next: EngineState) -> EngineState {
        let mut state = lock(&self.state);
        let previous = std::mem::replace(&mut *state, next.clone());
        if previous != next {
            info!(from = %previous, to = %next, "engine state changed");
        }
        previous
    }

    pub(crate) fn reset_stats(&self) {
        *lock(&self.stats) = EngineStats {
            start_time: Some(Utc::now()),
            ..EngineStats::default()
        };
    }

    pub(crate) fn finish_stats(&self) {
        lock(&self.stats).end_time = Some(Utc::now());
    }

    /// Processes one identifier to a terminal result.
    ///
    /// The engine is `ProcessingItem` while this runs. Afterwards it is back
    /// to `Idle`, or to `BatchRunning` when called from a batch, so the batch
    /// state survives its items.
    pub async fn process_one(&self, identifier: &str) -> AutomationResult {
        let _worker = self.worker.lock().await;
        let previous = self.transition(EngineState::ProcessingItem(identifier.to_string()));
        let resume = match previous {
            EngineState::BatchRunning => EngineState::BatchRunning,
            _ => EngineState::Idle,
        };

        let clock = Instant::now();
        let mut result = AutomationResult::processing(identifier, Utc::now());
        {
            let mut stats = lock(&self.stats);
            if stats.start_time.is_none() {
                stats.start_time = Some(result.started_at);
            }
        }

        if let Err(reason) = self.validator.validate(identifier) {
            warn!(identifier, reason = %reason, "identifier rejected");
            result.finalize(Err((AutomationStatus::Invalid, reason)), 0, 0.0);
            self.record(&result);
            self.transition(resume);
            return result;
        }

        let (outcome, attempts) = self.run_attempts(identifier).await;
        result.finalize(outcome, attempts, clock.elapsed().as_secs_f64());
        self.record(&result);

        match result.status {
            AutomationStatus::Success => info!(
                identifier,
                attempts,
                duration = result.duration_seconds,
                "identifier processed"
            ),
            status => error!(
                identifier,
                attempts,
                status = %status,
                error = result.error.as_deref().unwrap_or_default(),
                "identifier failed"
            ),
        }
        self.transition(resume);
        result
    }

    async fn run_attempts(
        &self,
        identifier: &str,
    ) -> (Result<ExtractionBundle, (AutomationStatus, String)>, usize) {
        let max_attempts = self.config.max_attempts.max(1);
        let budget = self.config.attempt_timeout();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            lock(&self.metrics).record_attempt();
            info!(identifier, attempt, max_attempts, "starting attempt");

            let error = match timeout(budget, self.pipeline.run(identifier)).await {
                Ok(Ok(bundle)) => return (Ok(bundle), attempt),
                Ok(Err(err)) => err,
                Err(_) => {
                    lock(&self.metrics).record_timeout();
                    BrowserError::Timeout(format!(
                        "pipeline result after {}s",
                        budget.as_secs()
                    ))
                }
            };

            let category = ErrorCategorizer::categorize(&error);
            let failure = (category.status(), error.to_string());
            if attempt >= max_attempts || !category.is_retryable() {
                return (Err(failure), attempt);
            }

            let delay = self.config.retry_delay();
            warn!(
                identifier,
                attempt,
                category = ?category,
                error = %error,
                delay_secs = delay.as_secs(),
                "attempt failed, retrying"
            );
            if category == ErrorCategory::BridgeNotReady {
                warn!("browser bridge is not initialized; later attempts will fail the same way");
            }
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    fn record(&self, result: &AutomationResult) {
        let mut stats = lock(&self.stats);
        stats.total_processed = stats.total_processed.saturating_add(1);
        if result.is_success() {
            stats.successful = stats.successful.saturating_add(1);
        } else {
            stats.failed = stats.failed.saturating_add(1);
            if result.status == AutomationStatus::Invalid && result.attempt == 0 {
                stats.skipped = stats.skipped.saturating_add(1);
            }
        }
        stats.end_time = result.ended_at;
    }
}
