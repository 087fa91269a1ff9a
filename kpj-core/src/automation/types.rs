use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::browser::ExtractionBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    Processing,
    Success,
    Failed,
    Timeout,
    Error,
    Invalid,
}

impl AutomationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationStatus::Processing => "processing",
            AutomationStatus::Success => "success",
            AutomationStatus::Failed => "failed",
            AutomationStatus::Timeout => "timeout",
            AutomationStatus::Error => "error",
            AutomationStatus::Invalid => "invalid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AutomationStatus::Processing)
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "identifier", rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    ProcessingItem(String),
    BatchRunning,
    BatchCompleted,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => f.write_str("IDLE"),
            EngineState::ProcessingItem(identifier) => write!(f, "PROCESSING_{identifier}"),
            EngineState::BatchRunning => f.write_str("BATCH_PROCESSING"),
            EngineState::BatchCompleted => f.write_str("BATCH_COMPLETED"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Part of `failed`: rejected before any browser work.
    pub skipped: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub requested: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: String,
    pub cancelled: bool,
}

/// Outcome of one identifier. Built by the engine, which finalizes it once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationResult {
    pub identifier: String,
    pub status: AutomationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionBundle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_in_batch: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_summary: Option<BatchSummary>,
}

impl AutomationResult {
    pub(crate) fn processing(identifier: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: AutomationStatus::Processing,
            data: None,
            error: None,
            attempt: 0,
            started_at,
            ended_at: None,
            duration_seconds: 0.0,
            sequence: None,
            total_in_batch: None,
            batch_summary: None,
        }
    }

    /// Sets the terminal status. Later calls are ignored.
    pub(crate) fn finalize(
        &mut self,
        outcome: Result<ExtractionBundle, (AutomationStatus, String)>,
        attempt: usize,
        elapsed_seconds: f64,
    ) {
        if self.status.is_terminal() {
            return;
        }
        match outcome {
            Ok(bundle) => {
                self.status = AutomationStatus::Success;
                self.data = Some(bundle);
            }
            Err((status, message)) => {
                self.status = status;
                self.error = Some(message);
            }
        }
        self.attempt = attempt;
        self.ended_at = Some(Utc::now());
        self.duration_seconds = (elapsed_seconds * 100.0).round() / 100.0;
    }

    pub fn is_success(&self) -> bool {
        self.status == AutomationStatus::Success
    }

    /// Flat field-name → text view for exporters. Fields vary by status.
    pub fn to_record(&self) -> BTreeMap<String, String> {
        let mut record = BTreeMap::new();
        record.insert("kpj".to_string(), self.identifier.clone());
        record.insert("status".to_string(), self.status.to_string());
        record.insert("attempt".to_string(), self.attempt.to_string());
        record.insert(
            "processing_start".to_string(),
            self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        if let Some(ended_at) = self.ended_at {
            record.insert(
                "processing_end".to_string(),
                ended_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            );
        }
        record.insert(
            "processing_duration_seconds".to_string(),
            format!("{:.2}", self.duration_seconds),
        );
        if let Some(error) = &self.error {
            record.insert("error".to_string(), error.clone());
        }
        if let Some(data) = &self.data {
            record.insert("page_title".to_string(), data.page_title.clone());
            record.insert("url".to_string(), data.url.clone());
            record.insert("tables_found".to_string(), data.tables.len().to_string());
            record.insert(
                "containers_found".to_string(),
                data.containers.len().to_string(),
            );
            if let Ok(json) = serde_json::to_string(data) {
                record.insert("data".to_string(), json);
            }
        }
        if let Some(sequence) = self.sequence {
            record.insert("sequence".to_string(), sequence.to_string());
        }
        if let Some(total) = self.total_in_batch {
            record.insert("total_in_batch".to_string(), total.to_string());
        }
        if let Some(summary) = &self.batch_summary {
            record.insert(
                "batch_success_rate".to_string(),
                summary.success_rate.clone(),
            );
        }
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Processing,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub current: usize,
    pub total: usize,
    pub percent: f64,
    pub identifier: String,
    pub phase: ProgressPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AutomationResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// One batch invocation. Replaces the previous run; never merged.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub items: Vec<String>,
    pub results: Vec<AutomationResult>,
    pub stats: BatchStats,
    pub summary: BatchSummary,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
