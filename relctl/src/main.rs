use std::process::ExitCode;

use clap::Parser;
use relctl::cli::{run, Cli, LogFormat};
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let run_id = uuid::Uuid::new_v4();
    tracing::info!(run_id = %run_id, "CLI application startup: tracing initialised, environment loaded");

    let span = tracing::info_span!("relctl", run_id = %run_id);
    match run(cli).instrument(span).await {
        Ok(()) => {
            tracing::info!("CLI completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
