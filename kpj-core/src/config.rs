use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AutomationConfig {
    pub browser: BrowserSection,
    pub engine: EngineSection,
    pub pipeline: PipelineSection,
    pub batch: BatchSection,
    pub validation: ValidationSection,
}

impl AutomationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.engine.attempt_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.attempt_timeout_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.pipeline.field_keywords.is_empty() {
            return Err(ConfigError::Invalid {
                field: "pipeline.field_keywords",
                reason: "at least one keyword is required".into(),
            });
        }
        if self.pipeline.button_keywords.is_empty() {
            return Err(ConfigError::Invalid {
                field: "pipeline.button_keywords",
                reason: "at least one keyword is required".into(),
            });
        }
        if self.batch.pacing_ms[0] > self.batch.pacing_ms[1] {
            return Err(ConfigError::Invalid {
                field: "batch.pacing_ms",
                reason: format!(
                    "lower bound {} exceeds upper bound {}",
                    self.batch.pacing_ms[0], self.batch.pacing_ms[1]
                ),
            });
        }
        if self.validation.min_length == 0 || self.validation.min_length > self.validation.max_length
        {
            return Err(ConfigError::Invalid {
                field: "validation",
                reason: format!(
                    "length range {}..={} is empty",
                    self.validation.min_length, self.validation.max_length
                ),
            });
        }
        let endpoint =
            url::Url::parse(&self.browser.debugger_url).map_err(|err| ConfigError::Invalid {
                field: "browser.debugger_url",
                reason: err.to_string(),
            })?;
        if !matches!(endpoint.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "browser.debugger_url",
                reason: format!("unsupported scheme `{}`", endpoint.scheme()),
            });
        }
        if let Some(target) = &self.browser.target_url {
            url::Url::parse(target).map_err(|err| ConfigError::Invalid {
                field: "browser.target_url",
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Connection to the browser a human has already logged in with.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSection {
    /// DevTools websocket endpoint (`ws://host:port/devtools/browser/<id>`).
    pub debugger_url: String,
    /// Substring used to pick the logged-in tab among the open pages.
    pub page_url_contains: Option<String>,
    /// Opened in a new tab when no page matches.
    pub target_url: Option<String>,
    pub binding_name: String,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            debugger_url: "ws://127.0.0.1:9222/devtools/browser".into(),
            page_url_contains: Some("sipp.bpjsketenagakerjaan.go.id".into()),
            target_url: Some("https://sipp.bpjsketenagakerjaan.go.id/".into()),
            binding_name: "kpjBridge".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_attempts: usize,
    pub attempt_timeout_seconds: u64,
    pub retry_delay_seconds: u64,
}

impl EngineSection {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_seconds: 45,
            retry_delay_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSection {
    pub field_keywords: Vec<String>,
    pub button_keywords: Vec<String>,
    pub fill_settle_ms: u64,
    pub extract_settle_ms: u64,
    pub max_table_rows: usize,
    pub max_containers: usize,
    pub container_text_limit: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            field_keywords: vec!["kpj".into()],
            button_keywords: vec![
                "cari".into(),
                "search".into(),
                "lihat".into(),
                "find".into(),
            ],
            fill_settle_ms: 1000,
            extract_settle_ms: 3000,
            max_table_rows: 20,
            max_containers: 10,
            container_text_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSection {
    /// Pause between consecutive items, drawn from `[min, max]` milliseconds.
    pub pacing_ms: [u64; 2],
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            pacing_ms: [1000, 1000],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationSection {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            min_length: 10,
            max_length: 15,
        }
    }
}

pub fn load_automation_config<P: AsRef<Path>>(path: P) -> Result<AutomationConfig> {
    let config: AutomationConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/automation.toml");
        let config = load_automation_config(path).expect("config should parse");
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.engine.attempt_timeout(), Duration::from_secs(45));
        assert_eq!(config.engine.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.batch.pacing_ms, [1000, 1000]);
        assert!(config.pipeline.button_keywords.contains(&"cari".to_string()));
        assert_eq!(config.browser.binding_name, "kpjBridge");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nretry_delay_seconds = 1").unwrap();
        let config = load_automation_config(file.path()).unwrap();
        assert_eq!(config.engine.retry_delay_seconds, 1);
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.pipeline.max_table_rows, 20);
        assert_eq!(config.validation.min_length, 10);
    }

    #[test]
    fn rejects_inverted_pacing_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\npacing_ms = [2000, 500]").unwrap();
        let err = load_automation_config(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "batch.pacing_ms",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_devtools_endpoint() {
        let mut config = AutomationConfig::default();
        config.browser.debugger_url = "ftp://127.0.0.1:9222".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "browser.debugger_url",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_automation_config("/nonexistent/automation.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/automation.toml"));
    }
}
