use std::path::PathBuf;

use clap::Args;

/// Checks KPJ numbers without touching the browser.
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// KPJ numbers to check
    pub identifiers: Vec<String>,

    /// Text file with KPJ numbers; every digit run of valid length is used
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}
