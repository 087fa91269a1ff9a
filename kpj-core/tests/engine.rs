use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use kpj_core::browser::{BrowserError, BrowserResult, ExtractionBundle, ItemPipeline};
use kpj_core::config::EngineSection;
use kpj_core::{AutomationEngine, AutomationStatus, EngineState, KpjValidator};

enum Step {
    Succeed,
    Fail(BrowserError),
    Hang,
}

struct ScriptedPipeline {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedPipeline {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemPipeline for ScriptedPipeline {
    async fn run(&self, identifier: &str) -> BrowserResult<ExtractionBundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
        match step {
            Step::Succeed => Ok(ExtractionBundle {
                page_title: format!("Hasil {identifier}"),
                url: "https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja".into(),
                ..ExtractionBundle::default()
            }),
            Step::Fail(err) => Err(err),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn engine_config() -> EngineSection {
    EngineSection {
        max_attempts: 3,
        attempt_timeout_seconds: 45,
        retry_delay_seconds: 5,
    }
}

fn engine(pipeline: Arc<ScriptedPipeline>) -> AutomationEngine {
    AutomationEngine::new(pipeline, Arc::new(KpjValidator::default()), engine_config())
}

#[tokio::test(start_paused = true)]
async fn invalid_identifier_never_reaches_pipeline() {
    let pipeline = ScriptedPipeline::new(vec![Step::Succeed]);
    let engine = engine(pipeline.clone());

    let result = engine.process_one("12AB").await;

    assert_eq!(result.status, AutomationStatus::Invalid);
    assert_eq!(result.attempt, 0);
    assert!(result.error.is_some());
    assert_eq!(pipeline.calls(), 0);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.stats().failed, 1);
    assert_eq!(engine.stats().skipped, 1);
    assert_eq!(engine.stats().total_processed, 1);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_timing_out_reports_timeout() {
    let pipeline = ScriptedPipeline::new(vec![Step::Hang, Step::Hang, Step::Hang]);
    let engine = engine(pipeline.clone());
    let start = Instant::now();

    let result = engine.process_one("1203306223").await;

    let elapsed = start.elapsed();
    assert_eq!(result.status, AutomationStatus::Timeout);
    assert_eq!(result.attempt, 3);
    assert_eq!(pipeline.calls(), 3);
    assert!(elapsed >= Duration::from_secs(145), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(150), "elapsed {elapsed:?}");
    assert!(result.duration_seconds >= 145.0);
    assert_eq!(engine.metrics().attempt_timeouts, 3);
}

#[tokio::test(start_paused = true)]
async fn retry_after_failure_then_success() {
    let pipeline = ScriptedPipeline::new(vec![
        Step::Fail(BrowserError::ElementNotFound(
            "find_button: search button not found".into(),
        )),
        Step::Succeed,
    ]);
    let engine = engine(pipeline.clone());
    let start = Instant::now();

    let result = engine.process_one("1203306223").await;

    assert_eq!(result.status, AutomationStatus::Success);
    assert_eq!(result.attempt, 2);
    assert!(result.error.is_none());
    assert_eq!(
        result.data.as_ref().map(|data| data.page_title.as_str()),
        Some("Hasil 1203306223")
    );
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(engine.stats().successful, 1);
}

#[tokio::test(start_paused = true)]
async fn final_status_reflects_last_attempt() {
    let pipeline = ScriptedPipeline::new(vec![
        Step::Hang,
        Step::Fail(BrowserError::ScriptExecution(
            "click_button: element detached".into(),
        )),
        Step::Fail(BrowserError::ElementNotFound(
            "find_field: KPJ field not found".into(),
        )),
    ]);
    let engine = engine(pipeline.clone());

    let result = engine.process_one("1203306223").await;

    assert_eq!(result.status, AutomationStatus::Failed);
    assert_eq!(result.attempt, 3);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("KPJ field not found"));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_stops_after_first_attempt() {
    let pipeline = ScriptedPipeline::new(vec![
        Step::Fail(BrowserError::InvalidInput("empty identifier".into())),
        Step::Succeed,
    ]);
    let engine = engine(pipeline.clone());

    let result = engine.process_one("1203306223").await;

    assert_eq!(result.status, AutomationStatus::Invalid);
    assert_eq!(result.attempt, 1);
    assert_eq!(pipeline.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn bridge_not_ready_exhausts_attempts_as_error() {
    let pipeline = ScriptedPipeline::new(vec![
        Step::Fail(BrowserError::NotReady),
        Step::Fail(BrowserError::NotReady),
        Step::Fail(BrowserError::NotReady),
    ]);
    let engine = engine(pipeline.clone());

    let result = engine.process_one("1203306223").await;

    assert_eq!(result.status, AutomationStatus::Error);
    assert_eq!(result.attempt, 3);
}

#[tokio::test(start_paused = true)]
async fn reset_returns_idle_engine_with_empty_stats() {
    let pipeline = ScriptedPipeline::new(vec![Step::Succeed]);
    let engine = engine(pipeline.clone());
    engine.process_one("1203306223").await;
    assert_eq!(engine.stats().total_processed, 1);

    let fresh = engine.reset();

    assert_eq!(fresh.state(), EngineState::Idle);
    assert_eq!(fresh.stats().total_processed, 0);
    assert!(fresh.stats().start_time.is_none());
}
