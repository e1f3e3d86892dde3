/// # relctl CLI interface
///
/// Command parsing and dispatch for the `relctl` binary. Every command is a
/// thin wrapper: it reads flags and secrets, builds the concrete remote
/// clients and hands over to `relctl-core`, which owns all release rules.
///
/// ## Command groups
/// - `release`: channel promotion (`osd-addon`) and source tagging
///   (`tag-repository`).
/// - `pipeline`: CI helpers (`supported-versions`, `cleanup-aws`).
/// - `ews`: manifest checks (`check-olm-graph`, `current-csv`).
/// - `report`: batch imports from S3 into ReportPortal, Polarion and Datahub,
///   archiving of processed results (`cleanup`) and Prometheus reports
///   (`query`).
///
/// ## Output
/// Logs go to stderr through `tracing`. Stdout carries `[scope] ` progress
/// lines and command results only. Failures bubble up as `anyhow::Error` and
/// are printed once by `main`.
///
/// [`run`] is public so integration tests can drive the CLI without spawning
/// the binary.
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use relctl_core::error::ErrorKind;
use tokio_util::sync::CancellationToken;

use crate::ews::{self, EwsCommand};
use crate::pipeline::{self, PipelineCommand};
use crate::release::{self, ReleaseCommand};
use crate::report::{self, ReportCommand};

/// Release-engineering CLI for managed operator products.
#[derive(Parser, Debug)]
#[clap(
    name = "relctl",
    version,
    about = "Promote operator bundles, check OLM graphs, import test results and sweep cluster leftovers"
)]
pub struct Cli {
    /// Log output format on stderr
    #[arg(long = "log-format", global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Release a product version
    Release {
        #[clap(subcommand)]
        command: ReleaseCommand,
    },
    /// Helpers for CI pipelines
    Pipeline {
        #[clap(subcommand)]
        command: PipelineCommand,
    },
    /// Checks over OLM manifests
    Ews {
        #[clap(subcommand)]
        command: EwsCommand,
    },
    /// Import test results into reporting systems
    Report {
        #[clap(subcommand)]
        command: ReportCommand,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Release { .. } => "release",
            Commands::Pipeline { .. } => "pipeline",
            Commands::Ews { .. } => "ews",
            Commands::Report { .. } => "report",
        }
    }
}

/// Log a core failure with its taxonomy kind and convert it for the CLI boundary.
pub(crate) fn failure<E>(command: &str, kind: ErrorKind, err: E) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::error!(command, kind = %kind, error = %err, "[CLI] Command failed");
    anyhow::Error::new(err)
}

/// Cancelled on Ctrl-C so long-running commands stop between steps.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[CLI] Interrupt received, cancelling");
            on_signal.cancel();
        }
    });
    cancel
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!(command = cli.command.name(), "[CLI] Dispatching command");
    let cancel = interrupt_token();

    match cli.command {
        Commands::Release { command } => release::run(command, &cancel).await,
        Commands::Pipeline { command } => pipeline::run(command, &cancel).await,
        Commands::Ews { command } => ews::run(command),
        Commands::Report { command } => report::run(command, &cancel).await,
    }
}
