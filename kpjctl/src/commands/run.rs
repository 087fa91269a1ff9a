use std::path::PathBuf;

use clap::Args;

/// Processes a list of KPJ numbers against the logged-in SIPP tab.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// KPJ numbers to look up, in order
    pub identifiers: Vec<String>,

    /// Text file with KPJ numbers; every digit run of valid length is used
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Overrides `browser.debugger_url`
    #[arg(long, value_name = "WS_URL")]
    pub debugger_url: Option<String>,

    /// Overrides the pacing range between identifiers, e.g. `500-1500`
    #[arg(long, value_name = "MIN-MAX", value_parser = parse_pacing)]
    pub pacing_ms: Option<[u64; 2]>,

    /// Drops rejected entries before the batch starts instead of reporting them as invalid
    #[arg(long)]
    pub skip_invalid: bool,
}

fn parse_pacing(raw: &str) -> Result<[u64; 2], String> {
    let (min, max) = match raw.split_once('-') {
        Some((min, max)) => (min, max),
        None => (raw, raw),
    };
    let min = min
        .trim()
        .parse::<u64>()
        .map_err(|err| format!("invalid pacing lower bound: {err}"))?;
    let max = max
        .trim()
        .parse::<u64>()
        .map_err(|err| format!("invalid pacing upper bound: {err}"))?;
    if min > max {
        return Err(format!("pacing range {min}-{max} is inverted"));
    }
    Ok([min, max])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_accepts_range_and_single_value() {
        assert_eq!(parse_pacing("500-1500"), Ok([500, 1500]));
        assert_eq!(parse_pacing("0"), Ok([0, 0]));
        assert!(parse_pacing("2000-1000").is_err());
        assert!(parse_pacing("fast").is_err());
    }
}
