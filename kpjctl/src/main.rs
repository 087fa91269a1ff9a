use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = kpjctl::Cli::parse();
    kpjctl::init_logging(cli.log_level.as_deref());
    if let Err(err) = kpjctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
