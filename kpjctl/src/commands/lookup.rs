use clap::Args;

/// Looks up a single KPJ number.
#[derive(Args, Debug, Clone)]
pub struct LookupArgs {
    /// KPJ number
    pub kpj: String,

    /// Overrides `browser.debugger_url`
    #[arg(long, value_name = "WS_URL")]
    pub debugger_url: Option<String>,
}
