use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineSection;

use super::bridge::{lock, BridgeChannel};
use super::error::{BrowserError, BrowserResult};
use super::steps::{
    ButtonMatch, ElementSelector, ExtractionBundle, FieldMatch, FindButtonReply, FindFieldReply,
    StepAction, StepResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    FindField,
    FillField,
    FindButton,
    ClickButton,
    ExtractData,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::FindField => "find_field",
            PipelineStage::FillField => "fill_field",
            PipelineStage::FindButton => "find_button",
            PipelineStage::ClickButton => "click_button",
            PipelineStage::ExtractData => "extract_data",
        };
        f.write_str(label)
    }
}

/// Runs the page interaction for one identifier.
#[async_trait]
pub trait ItemPipeline: Send + Sync {
    async fn run(&self, identifier: &str) -> BrowserResult<ExtractionBundle>;
}

/// `FindField → FillField → FindButton → ClickButton → ExtractData`, each step
/// a script executed through the bridge. Stops at the first failing step.
pub struct StepPipeline {
    bridge: Arc<BridgeChannel>,
    config: PipelineSection,
}

impl StepPipeline {
    pub fn new(bridge: Arc<BridgeChannel>, config: PipelineSection) -> Self {
        Self { bridge, config }
    }

    pub fn bridge(&self) -> &Arc<BridgeChannel> {
        &self.bridge
    }

    pub async fn find_field(&self, marker: &str) -> BrowserResult<FieldMatch> {
        let result = self
            .step(
                PipelineStage::FindField,
                StepAction::FindField {
                    keywords: self.config.field_keywords.clone(),
                    marker: marker.to_string(),
                },
            )
            .await?;
        let reply: FindFieldReply = result.decode()?;
        if reply.field.reason.is_fallback() {
            self.record_fallback();
            warn!(
                reason = ?reply.field.reason,
                total_fields = reply.total_fields,
                "no keyword match for input field, using fallback"
            );
        }
        Ok(reply.field)
    }

    pub async fn fill_field(&self, selector: &ElementSelector, value: &str) -> BrowserResult<()> {
        self.step(
            PipelineStage::FillField,
            StepAction::FillValue {
                selector: selector.clone(),
                value: value.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn find_button(&self, marker: &str) -> BrowserResult<ButtonMatch> {
        let result = self
            .step(
                PipelineStage::FindButton,
                StepAction::FindButton {
                    keywords: self.config.button_keywords.clone(),
                    marker: marker.to_string(),
                },
            )
            .await?;
        let reply: FindButtonReply = result.decode()?;
        if reply.button.reason.is_fallback() {
            self.record_fallback();
            warn!(
                reason = ?reply.button.reason,
                total_buttons = reply.total_buttons,
                "no keyword match for search button, using fallback"
            );
        }
        Ok(reply.button)
    }

    pub async fn click_button(&self, selector: &ElementSelector) -> BrowserResult<()> {
        self.step(
            PipelineStage::ClickButton,
            StepAction::Click {
                selector: selector.clone(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn extract_data(&self) -> BrowserResult<ExtractionBundle> {
        settle(self.config.extract_settle_ms).await;
        let result = self
            .step(
                PipelineStage::ExtractData,
                StepAction::Extract {
                    max_rows: self.config.max_table_rows,
                    max_containers: self.config.max_containers,
                    text_limit: self.config.container_text_limit,
                },
            )
            .await?;
        let bundle: ExtractionBundle = result.decode()?;
        lock(&self.bridge.metrics_handle()).record_extraction();
        Ok(bundle)
    }

    async fn step(&self, stage: PipelineStage, action: StepAction) -> BrowserResult<StepResult> {
        debug!(stage = %stage, "running pipeline step");
        let result = self.bridge.execute(&action).await?;
        if result.success {
            return Ok(result);
        }
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| "step reported failure".to_string());
        // Extraction only reports failure from its own catch block.
        if result.threw() || stage == PipelineStage::ExtractData {
            Err(BrowserError::ScriptExecution(format!("{stage}: {message}")))
        } else {
            Err(BrowserError::ElementNotFound(format!("{stage}: {message}")))
        }
    }

    fn record_fallback(&self) {
        lock(&self.bridge.metrics_handle()).record_fallback();
    }
}

async fn settle(millis: u64) {
    if millis > 0 {
        sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl ItemPipeline for StepPipeline {
    async fn run(&self, identifier: &str) -> BrowserResult<ExtractionBundle> {
        let field_marker = Uuid::new_v4().simple().to_string();
        let field = self.find_field(&field_marker).await?;
        debug!(
            identifier,
            field_id = ?field.id,
            field_name = ?field.name,
            "input field located"
        );

        self.fill_field(&ElementSelector::marker(&field_marker), identifier)
            .await?;
        info!(identifier, "identifier filled");
        settle(self.config.fill_settle_ms).await;

        let button_marker = Uuid::new_v4().simple().to_string();
        let button = self.find_button(&button_marker).await?;
        debug!(identifier, button_text = ?button.text, "search button located");

        self.click_button(&ElementSelector::marker(&button_marker))
            .await?;
        info!(identifier, "search submitted");

        let bundle = self.extract_data().await?;
        info!(
            identifier,
            tables = bundle.tables.len(),
            rows = bundle.row_count(),
            containers = bundle.containers.len(),
            "result page extracted"
        );
        Ok(bundle)
    }
}
