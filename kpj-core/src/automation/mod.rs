mod batch;
mod engine;
mod types;

pub use batch::{BatchOrchestrator, StopHandle};
pub use engine::AutomationEngine;
pub use types::{
    AutomationResult, AutomationStatus, BatchRun, BatchStats, BatchSummary, EngineState,
    EngineStats, ProgressEvent, ProgressPhase,
};
