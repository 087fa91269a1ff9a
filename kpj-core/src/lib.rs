pub mod automation;
pub mod browser;
pub mod config;
pub mod error;
pub mod validation;

pub use automation::{
    AutomationEngine, AutomationResult, AutomationStatus, BatchOrchestrator, BatchRun,
    BatchSummary, EngineState, EngineStats, ProgressEvent, ProgressPhase, StopHandle,
};
pub use browser::{
    BridgeChannel, BrowserError, BrowserResult, BrowserSurface, ChromiumSurface,
    ExtractionBundle, ItemPipeline, StepPipeline,
};
pub use config::{load_automation_config, AutomationConfig};
pub use error::{ConfigError, Result};
pub use validation::{IdentifierValidator, KpjValidator, RejectedIdentifier};
