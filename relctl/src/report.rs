//! `report` commands: import test results from S3 into reporting systems,
//! archive processed results and run Prometheus report queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;

use relctl_core::archive::{ArchiveConfig, Archiver, BucketReport, ARCHIVE_PREFIX};
use relctl_core::contract::{ArtifactTransformer, ObjectTag, ReportSink};
use relctl_core::error::ErrorKind;
use relctl_core::import::{ImportReport, ImportSettings, Importer, ObjectOutcome, DEFAULT_WORKERS};
use relctl_core::query::{
    QueryReportConfig, QueryRunner, QueryWindow, DEFAULT_QUERY_TIMEOUT, DEFAULT_QUERY_WORKERS,
    DEFAULT_WINDOW,
};

use crate::cli::failure;
use crate::datahub::{
    self, DowntimeTransformer, PushgatewaySink, DEFAULT_JOB_NAME, DEFAULT_PUSHGATEWAY,
    DEFAULT_REPORT_PREFIX,
};
use crate::polarion::{self, PolarionSink, XunitTransformer};
use crate::prometheus::PrometheusClient;
use crate::reportportal::{self, LaunchArchive, ReportPortalSink, DEFAULT_PROJECT, DEFAULT_REPORTPORTAL_URL};
use crate::s3::S3Store;

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// Import test-result zips as ReportPortal launches
    ReportportalImport(ReportPortalArgs),
    /// Import JUnit results into Polarion test runs
    PolarionImport(PolarionArgs),
    /// Push downtime reports to the Datahub pushgateway
    DatahubImport(DatahubArgs),
    /// Move processed reports to the archive/ folder of their bucket
    Cleanup(CleanupArgs),
    /// Run Prometheus queries and write the results as a YAML report
    Query(QueryArgs),
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// YAML file listing buckets and the tags that mark a report as processed
    #[arg(long = "config-file")]
    pub config_file: PathBuf,
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// YAML file with the report name and its queries
    #[arg(long = "config-file")]
    pub config_file: PathBuf,
    /// Directory the report is written to
    #[arg(short, long)]
    pub output: PathBuf,
    /// Base URL of the Prometheus API
    #[arg(long = "prometheus-url", env = "PROMETHEUS_URL")]
    pub prometheus_url: String,
    #[arg(long, env = "PROMETHEUS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Seconds each query may take
    #[arg(short, long, default_value_t = DEFAULT_QUERY_TIMEOUT.as_secs())]
    pub timeout: u64,
    #[arg(long, default_value_t = DEFAULT_QUERY_WORKERS)]
    pub workers: usize,
    /// Window end as Unix seconds; defaults to now
    #[arg(long = "end-time")]
    pub end_time: Option<i64>,
    /// Window start as Unix seconds; overrides --duration
    #[arg(long = "start-time")]
    pub start_time: Option<i64>,
    /// Window length in seconds when no start time is given
    #[arg(long, default_value_t = DEFAULT_WINDOW.as_secs())]
    pub duration: u64,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// S3 bucket holding the artifacts
    #[arg(long)]
    pub bucket: String,
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Seconds between sink status polls
    #[arg(long = "poll-interval", default_value_t = 2)]
    pub poll_interval: u64,
    /// Seconds to wait for a sink job before giving up
    #[arg(long = "poll-timeout", default_value_t = 600)]
    pub poll_timeout: u64,
    /// Do not mark imported objects as processed (debug)
    #[arg(long = "no-tag", alias = "no-tagging")]
    pub no_tag: bool,
}

impl ImportArgs {
    fn settings(&self, tag: ObjectTag) -> ImportSettings {
        let mut settings = ImportSettings::new(&self.bucket, tag);
        settings.workers = self.workers;
        settings.poll_interval = Duration::from_secs(self.poll_interval);
        settings.poll_timeout = Duration::from_secs(self.poll_timeout);
        settings.write_tags = !self.no_tag;
        settings
    }
}

#[derive(Args, Debug)]
pub struct ReportPortalArgs {
    #[command(flatten)]
    pub import: ImportArgs,
    #[arg(long, default_value = DEFAULT_REPORTPORTAL_URL)]
    pub url: String,
    #[arg(long, default_value = DEFAULT_PROJECT)]
    pub project: String,
    #[arg(long, env = "REPORTPORTAL_TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Args, Debug)]
pub struct PolarionArgs {
    #[command(flatten)]
    pub import: ImportArgs,
    /// Use the Polarion stage instance
    #[arg(long)]
    pub stage: bool,
    /// Override the Polarion base URL
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long, env = "POLARION_USERNAME")]
    pub username: String,
    #[arg(long, env = "POLARION_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct DatahubArgs {
    #[command(flatten)]
    pub import: ImportArgs,
    #[arg(long, default_value = DEFAULT_PUSHGATEWAY)]
    pub pushgateway: String,
    #[arg(long = "jobname", default_value = DEFAULT_JOB_NAME)]
    pub job_name: String,
    /// Key prefix of the downtime report objects
    #[arg(long = "reportname", default_value = DEFAULT_REPORT_PREFIX)]
    pub report_prefix: String,
}

pub async fn run(command: ReportCommand, cancel: &CancellationToken) -> Result<()> {
    let (import, settings, sink, transformer) = match &command {
        ReportCommand::Cleanup(args) => return cleanup(args, cancel).await,
        ReportCommand::Query(args) => return query(args, cancel).await,
        ReportCommand::ReportportalImport(args) => {
            let sink: Arc<dyn ReportSink> =
                Arc::new(ReportPortalSink::new(&args.url, &args.project, &args.token)?);
            let transformer: Arc<dyn ArtifactTransformer> = Arc::new(LaunchArchive);
            let settings = args
                .import
                .settings(reportportal::processed_tag())
                .with_suffix(".zip");
            (&args.import, settings, sink, transformer)
        }
        ReportCommand::PolarionImport(args) => {
            let url = match (&args.url, args.stage) {
                (Some(url), _) => url.clone(),
                (None, true) => polarion::STAGE_URL.to_string(),
                (None, false) => polarion::PRODUCTION_URL.to_string(),
            };
            let sink: Arc<dyn ReportSink> =
                Arc::new(PolarionSink::new(url, &args.username, &args.password)?);
            let transformer: Arc<dyn ArtifactTransformer> =
                Arc::new(XunitTransformer::new().context("invalid xunit patterns")?);
            let settings = args
                .import
                .settings(polarion::processed_tag())
                .with_suffix(".zip");
            (&args.import, settings, sink, transformer)
        }
        ReportCommand::DatahubImport(args) => {
            let sink: Arc<dyn ReportSink> =
                Arc::new(PushgatewaySink::new(&args.pushgateway, &args.job_name)?);
            let transformer: Arc<dyn ArtifactTransformer> = Arc::new(DowntimeTransformer);
            let settings = args
                .import
                .settings(datahub::processed_tag())
                .with_prefix(&args.report_prefix);
            (&args.import, settings, sink, transformer)
        }
    };

    let store = S3Store::from_env(import.region.clone()).await;
    let importer = Importer::new(Arc::new(store), sink, transformer, settings);
    let report = importer
        .run(cancel)
        .await
        .map_err(|e| failure("report import", e.kind(), e))?;
    print_report(&importer.settings().processed_tag, &report);
    Ok(())
}

pub fn print_report(tag: &ObjectTag, report: &ImportReport) {
    let scope = &tag.key;
    for object in &report.objects {
        let outcome = match &object.outcome {
            ObjectOutcome::Filtered => continue,
            ObjectOutcome::AlreadyProcessed => "already processed".to_string(),
            ObjectOutcome::Skipped(reason) => format!("skipped: {reason}"),
            ObjectOutcome::Imported { job, tagged: true } => format!("imported as {job}"),
            ObjectOutcome::Imported { job, tagged: false } => {
                format!("imported as {job} (not tagged)")
            }
        };
        println!("[{scope}] {}: {outcome}", object.key);
    }
    println!(
        "[{scope}] {} imported, {} skipped, {} already processed",
        report.imported(),
        report.skipped(),
        report.already_processed()
    );
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        error!(kind = %ErrorKind::Input, error = ?e, config_path = ?path, "[REPORT] Config file unreadable");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        error!(kind = %ErrorKind::Input, error = ?e, config_path = ?path, "[REPORT] Config YAML rejected");
        anyhow::anyhow!("Failed to parse config YAML {:?}: {e}", path)
    })
}

async fn cleanup(args: &CleanupArgs, cancel: &CancellationToken) -> Result<()> {
    let config: ArchiveConfig = read_yaml(&args.config_file)?;
    let store = S3Store::from_env(args.region.clone()).await;
    let reports = Archiver::new(Arc::new(store))
        .run(config, cancel)
        .await
        .map_err(|e| failure("report cleanup", e.kind(), e))?;
    for report in &reports {
        print_cleanup(report);
    }
    println!("[All] Process completed");
    Ok(())
}

pub fn print_cleanup(report: &BucketReport) {
    let scope = &report.bucket;
    for key in &report.moved {
        println!("[{scope}] {key}: moved to {ARCHIVE_PREFIX}{key}");
    }
    for key in &report.failed {
        println!("[{scope}] {key}: left in place after an error");
    }
    println!(
        "[{scope}] {} moved, {} kept, {} failed",
        report.moved.len(),
        report.kept.len(),
        report.failed.len()
    );
}

async fn query(args: &QueryArgs, cancel: &CancellationToken) -> Result<()> {
    let config: QueryReportConfig = read_yaml(&args.config_file)?;
    let end = args.end_time.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let window = QueryWindow::new(end, args.start_time, Duration::from_secs(args.duration));
    let api = PrometheusClient::new(&args.prometheus_url, args.token.clone())?;
    let report = QueryRunner::new(Arc::new(api), window)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_workers(args.workers)
        .run(&config, cancel)
        .await
        .map_err(|e| failure("report query", e.kind(), e))?;
    let path = report
        .write(&args.output)
        .map_err(|e| failure("report query", e.kind(), e))?;
    println!("[{}] report generated: {}", config.name, path.display());
    Ok(())
}
