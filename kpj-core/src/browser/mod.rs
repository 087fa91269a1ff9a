mod bridge;
mod error;
mod error_handler;
mod metrics;
mod pipeline;
mod steps;
mod surface;

pub(crate) use bridge::lock;
pub use bridge::{BridgeChannel, CorrelationId, PendingScript, ResultSink, ScriptOutcome};
pub use error::{BrowserError, BrowserResult};
pub use error_handler::{ErrorCategorizer, ErrorCategory};
pub use metrics::AutomationMetrics;
pub use pipeline::{ItemPipeline, PipelineStage, StepPipeline};
pub use steps::{
    ButtonMatch, ContainerData, ElementSelector, ExtractionBundle, FieldMatch, MatchReason,
    StepAction, StepResult, TableCell, TableData, TableRow,
};
pub use surface::{BrowserSurface, ChromiumSurface, ScriptEnvelope};
