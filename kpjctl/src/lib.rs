use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use kpj_core::browser::{BridgeChannel, BrowserError, ChromiumSurface, StepPipeline};
use kpj_core::validation::RejectedIdentifier;
use kpj_core::{
    load_automation_config, AutomationConfig, AutomationEngine, AutomationResult,
    BatchOrchestrator, BatchRun, IdentifierValidator, KpjValidator, ProgressPhase,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod commands;

use commands::{LookupArgs, RunArgs, ValidateArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] kpj_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no KPJ numbers given; pass them as arguments or with --file")]
    NoIdentifiers,
    #[error("lookup for {identifier} finished with status {status}")]
    Unsuccessful { identifier: String, status: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "KPJ lookup automation for the SIPP portal", long_about = None)]
pub struct Cli {
    /// Path to automation.toml
    #[arg(long, default_value = "configs/automation.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log filter, e.g. `debug` or `kpj_core=trace` (defaults to RUST_LOG, then `info`)
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs a batch of lookups
    Run(RunArgs),
    /// Looks up one KPJ number
    Lookup(LookupArgs),
    /// Validates KPJ numbers without opening the browser
    Validate(ValidateArgs),
    /// Prints the effective configuration
    Config,
}

/// Installs the fmt subscriber on stderr so stdout carries only rendered output.
pub fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_automation_config(&cli.config)?;

    match &cli.command {
        Commands::Run(args) => {
            apply_overrides(&mut config, args.debugger_url.as_deref(), args.pacing_ms)?;
            let run = run_batch(&config, args, cli.format).await?;
            render(&run, cli.format)?;
        }
        Commands::Lookup(args) => {
            apply_overrides(&mut config, args.debugger_url.as_deref(), None)?;
            let session = Session::open(&config).await?;
            let result = session.engine.process_one(args.kpj.trim()).await;
            session.close();
            render(&result, cli.format)?;
            if !result.is_success() {
                return Err(AppError::Unsuccessful {
                    identifier: result.identifier,
                    status: result.status.to_string(),
                });
            }
        }
        Commands::Validate(args) => {
            let validator = KpjValidator::new(&config.validation);
            let identifiers =
                collect_identifiers(&args.identifiers, args.file.as_deref(), &validator)?;
            let (valid, rejected) = validator.validate_list(&identifiers);
            render(&ValidationReport { valid, rejected }, cli.format)?;
        }
        Commands::Config => {
            render(
                &ConfigReport {
                    path: cli.config.clone(),
                    config,
                },
                cli.format,
            )?;
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut AutomationConfig,
    debugger_url: Option<&str>,
    pacing_ms: Option<[u64; 2]>,
) -> Result<()> {
    if let Some(url) = debugger_url {
        config.browser.debugger_url = url.to_string();
    }
    if let Some(pacing) = pacing_ms {
        config.batch.pacing_ms = pacing;
    }
    config.validate()?;
    Ok(())
}

/// Positional entries are kept as typed so malformed ones surface as invalid
/// results; file contents go through digit-run extraction.
fn collect_identifiers(
    positional: &[String],
    file: Option<&Path>,
    validator: &KpjValidator,
) -> Result<Vec<String>> {
    let mut identifiers: Vec<String> = positional
        .iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if let Some(path) = file {
        let text = fs::read_to_string(path)?;
        identifiers.extend(validator.extract_from_text(&text));
    }
    if identifiers.is_empty() {
        return Err(AppError::NoIdentifiers);
    }
    Ok(identifiers)
}

async fn run_batch(
    config: &AutomationConfig,
    args: &RunArgs,
    format: OutputFormat,
) -> Result<BatchRun> {
    let validator = KpjValidator::new(&config.validation);
    let mut identifiers =
        collect_identifiers(&args.identifiers, args.file.as_deref(), &validator)?;
    if args.skip_invalid {
        let (valid, rejected) = validator.validate_list(&identifiers);
        for entry in &rejected {
            warn!(identifier = %entry.identifier, reason = %entry.reason, "skipping invalid KPJ");
        }
        if valid.is_empty() {
            return Err(AppError::NoIdentifiers);
        }
        identifiers = valid;
    }

    let session = Session::open(config).await?;
    let mut orchestrator = BatchOrchestrator::new(Arc::clone(&session.engine), &config.batch);
    let stop = orchestrator.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current KPJ");
            stop.request_stop();
        }
    });

    let outcome = orchestrator
        .run_batch(&identifiers, |event| {
            if matches!(format, OutputFormat::Text) && event.phase == ProgressPhase::Completed {
                if let Some(result) = &event.result {
                    eprintln!(
                        "[{}/{}] {} {}",
                        event.current, event.total, result.identifier, result.status
                    );
                }
            }
        })
        .await;

    interrupt.abort();
    session.close();
    Ok(outcome?)
}

/// Browser connection plus the engine wired on top of it.
struct Session {
    surface: Arc<ChromiumSurface>,
    bridge: Arc<BridgeChannel>,
    engine: Arc<AutomationEngine>,
}

impl Session {
    async fn open(config: &AutomationConfig) -> Result<Self> {
        let surface = Arc::new(ChromiumSurface::connect(config.browser.clone()).await?);
        let bridge = Arc::new(BridgeChannel::new(
            surface.clone(),
            config.browser.binding_name.clone(),
        ));
        bridge.initialize().await?;

        let pipeline = StepPipeline::new(Arc::clone(&bridge), config.pipeline.clone());
        let validator: Arc<dyn IdentifierValidator> =
            Arc::new(KpjValidator::new(&config.validation));
        let engine = AutomationEngine::new(Arc::new(pipeline), validator, config.engine.clone())
            .with_metrics(bridge.metrics_handle());
        info!(binding = %config.browser.binding_name, "automation session ready");

        Ok(Self {
            surface,
            bridge,
            engine: Arc::new(engine),
        })
    }

    fn close(&self) {
        let metrics = self.bridge.metrics();
        info!(
            dispatched = metrics.scripts_dispatched,
            delivered = metrics.results_delivered,
            dropped = metrics.deliveries_dropped,
            fallbacks = metrics.fallback_matches,
            "closing automation session"
        );
        self.bridge.abandon_all();
        self.surface.shutdown();
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for AutomationResult {
    fn display(&self) -> String {
        let mut line = format!(
            "{} | {} | attempt={} | {:.2}s",
            self.identifier, self.status, self.attempt, self.duration_seconds
        );
        if let Some(data) = &self.data {
            line.push_str(&format!(
                " | {} | tables={} rows={} containers={}",
                if data.page_title.is_empty() {
                    "<untitled>"
                } else {
                    data.page_title.as_str()
                },
                data.tables.len(),
                data.row_count(),
                data.containers.len()
            ));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" | {error}"));
        }
        line
    }
}

impl DisplayFallback for BatchRun {
    fn display(&self) -> String {
        let mut lines: Vec<String> = self.results.iter().map(|result| result.display()).collect();
        let summary = &self.summary;
        lines.push(format!(
            "Processed {}/{}: {} ok, {} failed ({}) in {}",
            summary.total,
            summary.requested,
            summary.successful,
            summary.failed,
            summary.success_rate,
            summary.duration
        ));
        if summary.cancelled {
            lines.push("Batch stopped before the end of the list".to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub rejected: Vec<RejectedIdentifier>,
}

impl DisplayFallback for ValidationReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{} valid, {} rejected",
            self.valid.len(),
            self.rejected.len()
        )];
        for entry in &self.rejected {
            lines.push(format!("  - {}: {}", entry.identifier, entry.reason));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub path: PathBuf,
    pub config: AutomationConfig,
}

impl DisplayFallback for ConfigReport {
    fn display(&self) -> String {
        let config = &self.config;
        [
            format!("Config: {}", self.path.display()),
            format!("  - DevTools: {}", config.browser.debugger_url),
            format!(
                "  - Target: {}",
                config.browser.target_url.as_deref().unwrap_or("-")
            ),
            format!(
                "  - Attempts: {} x {}s, retry after {}s",
                config.engine.max_attempts,
                config.engine.attempt_timeout_seconds,
                config.engine.retry_delay_seconds
            ),
            format!(
                "  - Pacing: {}-{} ms",
                config.batch.pacing_ms[0], config.batch.pacing_ms[1]
            ),
            format!(
                "  - KPJ length: {}-{} digits",
                config.validation.min_length, config.validation.max_length
            ),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpj_core::AutomationStatus;
    use tempfile::TempDir;

    #[test]
    fn identifiers_come_from_arguments_and_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kpj.txt");
        fs::write(
            &path,
            "Daftar peserta:\n1203306246 - Budi\nno. 99 / 1203306250, telp 0812\n",
        )
        .unwrap();

        let identifiers = collect_identifiers(
            &[" 1203306223 ".to_string(), "".to_string(), "bad".to_string()],
            Some(&path),
            &KpjValidator::default(),
        )
        .unwrap();

        assert_eq!(
            identifiers,
            vec!["1203306223", "bad", "1203306246", "1203306250"]
        );
    }

    #[test]
    fn empty_input_is_reported() {
        let err = collect_identifiers(&[], None, &KpjValidator::default()).unwrap_err();
        assert!(matches!(err, AppError::NoIdentifiers));
    }

    #[test]
    fn overrides_are_validated() {
        let mut config = load_automation_config("../configs/automation.toml").unwrap();
        let url = "ws://10.0.0.5:9222/devtools/browser/abc";
        apply_overrides(&mut config, Some(url), Some([0, 250])).unwrap();
        assert_eq!(config.browser.debugger_url, url);
        assert_eq!(config.batch.pacing_ms, [0, 250]);

        let err = apply_overrides(&mut config, None, Some([900, 100])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn validation_report_lists_reasons() {
        let validator = KpjValidator::default();
        let (valid, rejected) = validator.validate_list(["1203306223", "12345", "12033O6223"]);
        let report = ValidationReport { valid, rejected };
        let text = report.display();
        assert!(text.starts_with("1 valid, 2 rejected"));
        assert!(text.contains("12345: KPJ must be 10-15 digits"));
        assert!(text.contains("12033O6223: KPJ must contain only digits"));
    }

    #[test]
    fn config_report_renders_fixture() {
        let path = PathBuf::from("../configs/automation.toml");
        let config = load_automation_config(&path).unwrap();
        let report = ConfigReport { path, config };
        let text = report.display();
        assert!(text.contains("Attempts: 3 x 45s, retry after 5s"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["config"]["browser"]["binding_name"], "kpjBridge");
    }

    #[test]
    fn failed_result_line_carries_error() {
        let result = AutomationResult {
            identifier: "1203306223".into(),
            status: AutomationStatus::Failed,
            data: None,
            error: Some("find_field: KPJ field not found".into()),
            attempt: 3,
            started_at: chrono::Utc::now(),
            ended_at: None,
            duration_seconds: 10.5,
            sequence: None,
            total_in_batch: None,
            batch_summary: None,
        };
        let text = result.display();
        assert!(text.starts_with("1203306223 | failed | attempt=3 | 10.50s"));
        assert!(text.ends_with("| find_field: KPJ field not found"));
    }
}
