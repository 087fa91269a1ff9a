use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserResult};
use crate::config::BatchSection;

use super::engine::AutomationEngine;
use super::types::{
    AutomationResult, BatchRun, BatchStats, BatchSummary, EngineState, ProgressEvent,
    ProgressPhase,
};

/// Cooperative stop signal, checked between items only.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct Pacer {
    range: (u64, u64),
}

impl Pacer {
    fn new(config: &BatchSection) -> Self {
        Self {
            range: (config.pacing_ms[0], config.pacing_ms[1]),
        }
    }

    async fn wait(&self) -> u64 {
        if self.range.0 == 0 && self.range.1 == 0 {
            return 0;
        }
        let lower = self.range.0.min(self.range.1);
        let upper = self.range.0.max(self.range.1);
        let delay = if lower == upper {
            lower
        } else {
            rand::thread_rng().gen_range(lower..=upper)
        };
        sleep(Duration::from_millis(delay)).await;
        delay
    }
}

/// Feeds an identifier list through the engine one item at a time.
pub struct BatchOrchestrator {
    engine: Arc<AutomationEngine>,
    pacer: Pacer,
    stop: StopHandle,
    last_run: Option<BatchRun>,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<AutomationEngine>, config: &BatchSection) -> Self {
        Self {
            engine,
            pacer: Pacer::new(config),
            stop: StopHandle::default(),
            last_run: None,
        }
    }

    pub fn engine(&self) -> &Arc<AutomationEngine> {
        &self.engine
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn last_run(&self) -> Option<&BatchRun> {
        self.last_run.as_ref()
    }

    pub async fn run_batch<F>(
        &mut self,
        identifiers: &[String],
        mut on_progress: F,
    ) -> BrowserResult<BatchRun>
    where
        F: FnMut(ProgressEvent),
    {
        if identifiers.is_empty() {
            return Err(BrowserError::InvalidInput(
                "identifier list is empty".to_string(),
            ));
        }

        let total = identifiers.len();
        let started_at = Utc::now();
        let clock = Instant::now();
        self.engine.reset_stats();
        self.engine.transition(EngineState::BatchRunning);
        info!(total, "starting batch");

        let mut results: Vec<AutomationResult> = Vec::with_capacity(total);
        let mut stats = BatchStats::default();
        let mut cancelled = false;
        let mut paced_ms = 0u64;

        for (index, identifier) in identifiers.iter().enumerate() {
            if self.stop.is_stop_requested() {
                warn!(processed = stats.processed, remaining = total - index, "batch stopped");
                cancelled = true;
                break;
            }

            let current = index + 1;
            let percent = current as f64 / total as f64 * 100.0;
            on_progress(ProgressEvent {
                current,
                total,
                percent,
                identifier: identifier.clone(),
                phase: ProgressPhase::Processing,
                result: None,
            });
            info!(
                current,
                total,
                percent = %format!("{percent:.1}"),
                identifier = %identifier,
                "batch progress"
            );

            let mut result = self.engine.process_one(identifier).await;
            result.sequence = Some(current);
            result.total_in_batch = Some(total);

            stats.processed += 1;
            if result.is_success() {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }

            on_progress(ProgressEvent {
                current,
                total,
                percent,
                identifier: identifier.clone(),
                phase: ProgressPhase::Completed,
                result: Some(result.clone()),
            });
            results.push(result);

            if current < total {
                let waited = self.pacer.wait().await;
                paced_ms += waited;
                debug!(delay_ms = waited, "pacing before next identifier");
            }
        }

        self.stop.clear();
        let ended_at = Utc::now();
        let summary = summarize(
            &stats,
            total,
            started_at,
            ended_at,
            clock.elapsed(),
            cancelled,
        );
        for result in &mut results {
            result.batch_summary = Some(summary.clone());
        }
        self.engine.finish_stats();
        self.engine.transition(EngineState::BatchCompleted);
        info!(
            processed = stats.processed,
            successful = stats.successful,
            failed = stats.failed,
            success_rate = %summary.success_rate,
            paced_ms,
            cancelled,
            "batch finished"
        );

        let run = BatchRun {
            items: identifiers.to_vec(),
            results,
            stats,
            summary,
            started_at,
            ended_at,
        };
        self.last_run = Some(run.clone());
        Ok(run)
    }
}

fn summarize(
    stats: &BatchStats,
    requested: usize,
    started_at: chrono::DateTime<Utc>,
    ended_at: chrono::DateTime<Utc>,
    elapsed: Duration,
    cancelled: bool,
) -> BatchSummary {
    let total = stats.processed;
    let rate = if total > 0 {
        stats.successful as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    BatchSummary {
        total,
        requested,
        successful: stats.successful,
        failed: total - stats.successful,
        success_rate: format!("{rate:.1}%"),
        started_at,
        ended_at,
        duration: format!("{:.1}s", elapsed.as_secs_f64()),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_uses_one_decimal() {
        let stats = BatchStats {
            processed: 3,
            successful: 2,
            failed: 1,
        };
        let now = Utc::now();
        let summary = summarize(&stats, 3, now, now, Duration::from_millis(12_040), false);
        assert_eq!(summary.success_rate, "66.7%");
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.duration, "12.0s");
    }

    #[test]
    fn empty_processed_set_has_zero_rate() {
        let now = Utc::now();
        let summary = summarize(&BatchStats::default(), 4, now, now, Duration::ZERO, true);
        assert_eq!(summary.success_rate, "0.0%");
        assert_eq!(summary.requested, 4);
        assert!(summary.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_pacing_sleeps_exact_delay() {
        let pacer = Pacer::new(&BatchSection {
            pacing_ms: [1000, 1000],
        });
        let start = Instant::now();
        assert_eq!(pacer.wait().await, 1000);
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }
}
