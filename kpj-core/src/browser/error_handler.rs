use serde::Serialize;

use crate::automation::AutomationStatus;

use super::error::BrowserError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidInput,
    BridgeNotReady,
    ElementNotFound,
    ScriptExecution,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    /// Validation failures never consume the retry budget.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::InvalidInput)
    }

    pub fn status(self) -> AutomationStatus {
        match self {
            ErrorCategory::InvalidInput => AutomationStatus::Invalid,
            ErrorCategory::ElementNotFound | ErrorCategory::ScriptExecution => {
                AutomationStatus::Failed
            }
            ErrorCategory::Timeout => AutomationStatus::Timeout,
            ErrorCategory::BridgeNotReady | ErrorCategory::Unknown => AutomationStatus::Error,
        }
    }
}

pub struct ErrorCategorizer;

impl ErrorCategorizer {
    pub fn categorize(error: &BrowserError) -> ErrorCategory {
        match error {
            BrowserError::InvalidInput(_) => ErrorCategory::InvalidInput,
            BrowserError::NotReady => ErrorCategory::BridgeNotReady,
            BrowserError::ElementNotFound(_) => ErrorCategory::ElementNotFound,
            BrowserError::ScriptExecution(_) | BrowserError::Decode(_) => {
                ErrorCategory::ScriptExecution
            }
            BrowserError::Timeout(_) => ErrorCategory::Timeout,
            BrowserError::Cdp(err) => {
                if err.to_string().to_lowercase().contains("timeout") {
                    ErrorCategory::Timeout
                } else {
                    ErrorCategory::Unknown
                }
            }
            BrowserError::Connect(_)
            | BrowserError::Abandoned(_)
            | BrowserError::Configuration(_)
            | BrowserError::Unexpected(_) => ErrorCategory::Unknown,
        }
    }
}
