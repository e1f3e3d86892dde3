//! `pipeline` commands used by CI jobs.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use relctl_core::contract::{Git, TagFilter};
use relctl_core::git::GitCli;
use relctl_core::graph::bundle_versions;
use relctl_core::manifest::read_production_version;
use relctl_core::promote::MAIN_BRANCH;
use relctl_core::selector::{render, supported_versions, SupportPolicy};
use relctl_core::sweep::Sweeper;
use relctl_core::version::OlmType;

use crate::aws;
use crate::cli::failure;
use crate::gitlab::DEFAULT_GITLAB_URL;
use crate::release::DEFAULT_MANAGED_TENANTS_ORIGIN;

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Print the versions still supported under the release policy
    SupportedVersions(SupportedVersionsArgs),
    /// Delete the AWS resources left behind by a cluster
    CleanupAws(CleanupAwsArgs),
}

#[derive(Args, Debug)]
pub struct SupportedVersionsArgs {
    #[arg(long = "olmType", default_value = "integreatly-operator")]
    pub olm_type: OlmType,
    /// Number of major versions to keep
    #[arg(short = 'M', long = "max-majors", default_value_t = 1)]
    pub max_majors: usize,
    /// Number of minor versions to keep per major
    #[arg(short = 'm', long = "max-minors", default_value_t = 3)]
    pub max_minors: usize,
    /// managed-tenants clone URL
    #[arg(long = "managedTenants", default_value = DEFAULT_MANAGED_TENANTS_ORIGIN)]
    pub managed_tenants: String,
    #[arg(long = "gitlab-url", default_value = DEFAULT_GITLAB_URL)]
    pub gitlab_url: String,
    #[arg(long = "gitlab-token", env = "GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct CleanupAwsArgs {
    /// Value of the cluster-id tag every swept resource carries
    #[arg(long = "cluster-id")]
    pub cluster_id: String,
    /// Extra tag to match, as key=value; repeatable
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
    /// Report what would be deleted without deleting anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Give up after this many seconds
    #[arg(long, default_value_t = 1800)]
    pub timeout: u64,
    /// Seconds between sweep passes
    #[arg(long, default_value_t = 30)]
    pub interval: u64,
    #[arg(long, default_value_t = 10)]
    pub workers: usize,
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

pub async fn run(command: PipelineCommand, cancel: &CancellationToken) -> Result<()> {
    match command {
        PipelineCommand::SupportedVersions(args) => supported(args).await,
        PipelineCommand::CleanupAws(args) => cleanup_aws(args, cancel).await,
    }
}

async fn supported(args: SupportedVersionsArgs) -> Result<()> {
    let git = match &args.gitlab_token {
        Some(token) => GitCli::with_credentials(args.gitlab_url.as_str(), token.as_str()),
        None => GitCli::new(),
    };
    let scratch = tempfile::tempdir().context("failed to create a scratch directory")?;
    let checkout = scratch.path().join("managed-tenants");
    git.clone_repo(&args.managed_tenants, MAIN_BRANCH, &checkout)
        .await
        .map_err(|e| failure("supported-versions", e.kind(), e))?;

    let olm_type = args.olm_type;
    let versions = bundle_versions(&checkout.join(olm_type.bundle_folder()), olm_type)
        .map_err(|e| failure("supported-versions", e.kind(), e))?;
    let production = read_production_version(&checkout.join(olm_type.production_addon_file()), olm_type)
        .map_err(|e| failure("supported-versions", e.kind(), e))?;
    let policy = SupportPolicy {
        max_majors: args.max_majors,
        max_minors: args.max_minors,
    };
    info!(
        olm_type = %olm_type,
        production = %production,
        bundles = versions.len(),
        "[PIPELINE] Selecting supported versions"
    );
    let selected = supported_versions(&versions, &production, policy)
        .map_err(|e| failure("supported-versions", e.kind(), e))?;
    println!("{}", render(&selected));
    Ok(())
}

async fn cleanup_aws(args: CleanupAwsArgs, cancel: &CancellationToken) -> Result<()> {
    let filter = args
        .tags
        .iter()
        .fold(TagFilter::new(&args.cluster_id), |f, (k, v)| f.with_tag(k, v));
    let config = aws::sdk_config(args.region.clone()).await;
    let sweeper = Sweeper::new(aws::resource_classes(&config), args.workers);

    let scope = format!("cleanup-aws/{}", args.cluster_id);
    let mut pass = 0;
    let report = sweeper
        .sweep_until_complete(
            &filter,
            args.dry_run,
            Duration::from_secs(args.interval),
            Duration::from_secs(args.timeout),
            cancel,
            |report| {
                pass += 1;
                println!("[{scope}] pass {pass}: {} items, {} pending", report.items.len(), report.pending());
                for line in report.to_string().lines() {
                    println!("[{scope}] {line}");
                }
            },
        )
        .await
        .map_err(|e| failure("cleanup-aws", e.kind(), e))?;
    println!("[{scope}] done, {} items handled", report.items.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_as_key_value() {
        assert_eq!(parse_tag("owner=qe"), Ok(("owner".into(), "qe".into())));
        assert_eq!(parse_tag("empty="), Ok(("empty".into(), String::new())));
        assert!(parse_tag("=x").is_err());
        assert!(parse_tag("novalue").is_err());
    }
}
