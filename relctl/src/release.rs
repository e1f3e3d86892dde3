//! `release` commands: channel promotion and source tagging.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use relctl_core::git::GitCli;
use relctl_core::promote::{promote, tag_release, PromotionRequest, Remote, TagOutcome};
use relctl_core::version::{OlmType, Version};

use crate::cli::failure;
use crate::github::{GitHubClient, DEFAULT_GITHUB_API};
use crate::gitlab::{project_from_url, GitLabClient, DEFAULT_GITLAB_URL};
use crate::load_config::load_config;

pub const DEFAULT_MANAGED_TENANTS_ORIGIN: &str =
    "https://gitlab.cee.redhat.com/service/managed-tenants.git";
pub const DEFAULT_MANAGED_TENANTS_FORK: &str =
    "https://gitlab.cee.redhat.com/integreatly-qe/managed-tenants.git";

#[derive(Subcommand, Debug)]
pub enum ReleaseCommand {
    /// Promote a bundle version into a managed-tenants addon channel
    OsdAddon(OsdAddonArgs),
    /// Tag the head of a release branch on GitHub
    TagRepository(TagRepositoryArgs),
}

#[derive(Args, Debug)]
pub struct OsdAddonArgs {
    /// Version to promote, e.g. 1.2.0 or 1.2.0-rc1
    #[arg(long)]
    pub version: String,
    /// Target channel: stage, edge or stable
    #[arg(long)]
    pub channel: String,
    #[arg(long = "addon-name")]
    pub addon_name: String,
    /// YAML release configuration declaring the addons
    #[arg(long = "addons-config", env = "RELCTL_ADDONS_CONFIG")]
    pub addons_config: PathBuf,
    #[arg(long = "managed-tenants-origin", default_value = DEFAULT_MANAGED_TENANTS_ORIGIN)]
    pub managed_tenants_origin: String,
    #[arg(long = "managed-tenants-fork", default_value = DEFAULT_MANAGED_TENANTS_FORK)]
    pub managed_tenants_fork: String,
    #[arg(long = "merge-request-description", default_value = "")]
    pub merge_request_description: String,
    #[arg(long = "gitlab-url", default_value = DEFAULT_GITLAB_URL)]
    pub gitlab_url: String,
    #[arg(long = "gitlab-token", env = "GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: String,
    /// Scratch directory for the clones; a temporary directory by default
    #[arg(long = "work-dir")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TagRepositoryArgs {
    /// GitHub repository as owner/name
    #[arg(long, default_value = "integr8ly/integreatly-operator")]
    pub repo: String,
    #[arg(long)]
    pub version: String,
    #[arg(long = "olmType", default_value = "integreatly-operator")]
    pub olm_type: OlmType,
    /// Branch to tag; the version's release branch by default
    #[arg(long)]
    pub branch: Option<String>,
    #[arg(long = "github-url", default_value = DEFAULT_GITHUB_API)]
    pub github_url: String,
    #[arg(long = "github-token", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,
}

pub async fn run(command: ReleaseCommand, cancel: &CancellationToken) -> Result<()> {
    match command {
        ReleaseCommand::OsdAddon(args) => osd_addon(args, cancel).await,
        ReleaseCommand::TagRepository(args) => tag_repository(args).await,
    }
}

fn remote(url: &str) -> Result<Remote> {
    let project = project_from_url(url)
        .with_context(|| format!("cannot derive a project path from {url}"))?;
    Ok(Remote {
        url: url.to_string(),
        project,
    })
}

async fn osd_addon(args: OsdAddonArgs, cancel: &CancellationToken) -> Result<()> {
    let config = load_config(&args.addons_config)?;
    let addon = config
        .addon(&args.addon_name)
        .map_err(|e| failure("osd-addon", e.kind(), e))?;
    let version = Version::parse(&args.version, addon.olm_type)
        .map_err(|e| failure("osd-addon", e.kind(), e))?;

    let scratch = tempfile::tempdir().context("failed to create a scratch directory")?;
    let work_root = args
        .work_dir
        .clone()
        .unwrap_or_else(|| scratch.path().to_path_buf());

    let request = PromotionRequest {
        config: &config,
        addon: &args.addon_name,
        channel: &args.channel,
        version,
        origin: remote(&args.managed_tenants_origin)?,
        fork: remote(&args.managed_tenants_fork)?,
        token: Some(args.gitlab_token.clone()),
        description: args.merge_request_description.clone(),
        work_root,
    };
    let git = Arc::new(GitCli::with_credentials(
        args.gitlab_url.as_str(),
        args.gitlab_token.as_str(),
    ));
    let merge_requests = GitLabClient::new(&args.gitlab_url, &args.gitlab_token)?;

    let scope = format!("{}/{}", args.addon_name, args.channel);
    println!("[{scope}] promoting {} to {}", request.version, args.channel);
    let outcome = promote(&request, git, &merge_requests, cancel)
        .await
        .map_err(|e| failure("osd-addon", e.kind(), e))?;

    info!(state = %outcome.state, branch = %outcome.branch, "[RELEASE] Promotion finished");
    println!("[{scope}] state: {}", outcome.state);
    println!("[{scope}] branch: {}", outcome.branch);
    if let Some(commit) = &outcome.commit {
        println!("[{scope}] commit: {commit}");
    }
    println!("[{scope}] merge request: {}", outcome.merge_request.web_url);
    if let Some(job) = &outcome.job {
        println!("[{scope}] bundle: {}", job.dest_bundle.display());
        if let Some(image_set) = &job.image_set_file {
            println!("[{scope}] image set: {}", image_set.display());
        }
    }
    Ok(())
}

async fn tag_repository(args: TagRepositoryArgs) -> Result<()> {
    let version = Version::parse(&args.version, args.olm_type)
        .map_err(|e| failure("tag-repository", e.kind(), e))?;
    let client = GitHubClient::new(&args.github_url, &args.github_token)?;
    let (outcome, sha) = tag_release(&client, &args.repo, &version, args.branch.as_deref())
        .await
        .map_err(|e| failure("tag-repository", e.kind(), e))?;
    let scope = &args.repo;
    match outcome {
        TagOutcome::Created => println!("[{scope}] created tag {} at {sha}", version.tag()),
        TagOutcome::AlreadyPresent => {
            println!("[{scope}] tag {} already at {sha}, nothing to do", version.tag())
        }
    }
    Ok(())
}
