use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser bridge not ready")]
    NotReady,
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("script execution failed: {0}")]
    ScriptExecution(String),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("devtools connection failed: {0}")]
    Connect(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("failed to decode script payload: {0}")]
    Decode(String),
    #[error("script result abandoned: {0}")]
    Abandoned(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}

impl From<serde_json::Error> for BrowserError {
    fn from(err: serde_json::Error) -> Self {
        BrowserError::Decode(err.to_string())
    }
}
