//! Channel promotion: publish one operator version to one managed-tenants
//! channel through a merge request from a fork.
//!
//! A promotion walks a fixed sequence of states:
//!
//! ```text
//! INIT -> CLONED -> BRANCHED -> BUNDLE_COPIED -> MANIFESTS_UPDATED
//!      -> COMMITTED -> PUSHED -> MR_OPENED -> DONE
//!                                          \-> SKIPPED_ALREADY_OPEN
//! ```
//!
//! Every write is keyed by the working branch name
//! `<addon>-<channel>-v<version>`, so re-running a promotion converges on the
//! same branch and the same merge request. Nothing is force-pushed.
//!
//! Local clones live under `work_root` in uniquely named directories. They are
//! left in place on failure for inspection; removing them is the caller's job.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AddonConfig, Channel, ChannelConfig, ReleaseConfig};
use crate::contract::{Git, MergeRequest, MergeRequestSpec, MergeRequests, SourceTags};
use crate::error::{ManifestError, PromoteError};
use crate::graph::CsvSet;
use crate::manifest::{copy_image_set_forward, csv_name, CsvDocument, PackageManifest};
use crate::runner;
use crate::version::Version;

pub const FORK_REMOTE: &str = "fork";
pub const MAIN_BRANCH: &str = "main";

const CLONE_WORKERS: usize = 2;

const SKIPPED_BUNDLE_FILES: [&str; 1] = ["bundle.Dockerfile"];
const USE_CLUSTER_STORAGE: &str = "USE_CLUSTER_STORAGE";
const ALERTING_EMAIL_ADDRESS: &str = "ALERTING_EMAIL_ADDRESS";
const SINGLE_NAMESPACE: &str = "SingleNamespace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionState {
    Init,
    Cloned,
    Branched,
    BundleCopied,
    ManifestsUpdated,
    Committed,
    Pushed,
    MrOpened,
    Done,
    SkippedAlreadyOpen,
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromotionState::Init => "INIT",
            PromotionState::Cloned => "CLONED",
            PromotionState::Branched => "BRANCHED",
            PromotionState::BundleCopied => "BUNDLE_COPIED",
            PromotionState::ManifestsUpdated => "MANIFESTS_UPDATED",
            PromotionState::Committed => "COMMITTED",
            PromotionState::Pushed => "PUSHED",
            PromotionState::MrOpened => "MR_OPENED",
            PromotionState::Done => "DONE",
            PromotionState::SkippedAlreadyOpen => "SKIPPED_ALREADY_OPEN",
        };
        f.write_str(name)
    }
}

/// A git remote plus the project path the merge-request host knows it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub url: String,
    pub project: String,
}

#[derive(Debug, Clone)]
pub struct PromotionRequest<'a> {
    pub config: &'a ReleaseConfig,
    pub addon: &'a str,
    pub channel: &'a str,
    pub version: Version,
    pub origin: Remote,
    pub fork: Remote,
    pub token: Option<String>,
    pub description: String,
    pub work_root: PathBuf,
}

/// Paths and remotes of one promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionJob {
    pub managed_tenants_dir: PathBuf,
    pub operator_dir: PathBuf,
    pub source_bundle: PathBuf,
    pub dest_bundle: PathBuf,
    pub source_remote: String,
    pub dest_remote: String,
    pub csv_file: Option<PathBuf>,
    pub package_file: Option<PathBuf>,
    pub image_set_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub state: PromotionState,
    pub branch: String,
    pub commit: Option<String>,
    pub merge_request: MergeRequest,
    /// `None` when an open merge request short-circuited the run.
    pub job: Option<PromotionJob>,
}

/// `<addon>-<channel>-v<version>`
pub fn working_branch(addon: &str, channel: Channel, version: &Version) -> String {
    format!("{addon}-{channel}-v{version}")
}

/// Validate addon, channel and version before anything touches disk.
pub fn precheck<'c>(
    config: &'c ReleaseConfig,
    addon: &str,
    channel: &str,
    version: &Version,
) -> Result<(&'c AddonConfig, &'c ChannelConfig), PromoteError> {
    let addon_cfg = config.addon(addon)?;
    let unknown = || PromoteError::UnknownChannel {
        addon: addon.to_string(),
        channel: channel.to_string(),
    };
    let parsed: Channel = channel.parse().map_err(|_| unknown())?;
    let channel_cfg = addon_cfg.channel(parsed).ok_or_else(unknown)?;
    if version.is_pre_release() && !parsed.accepts_pre_release() {
        return Err(PromoteError::PreReleaseNotAllowed {
            version: version.to_string(),
            channel: parsed.to_string(),
        });
    }
    Ok((addon_cfg, channel_cfg))
}

struct Tracker {
    state: PromotionState,
}

impl Tracker {
    fn advance(&mut self, next: PromotionState) {
        info!(from = %self.state, to = %next, "[PROMOTE] State transition");
        self.state = next;
    }
}

/// One repository to clone into the work root, optionally with the fork
/// registered as a second remote.
struct CloneJob {
    url: String,
    reference: String,
    dest: PathBuf,
    fork: Option<String>,
}

impl CloneJob {
    async fn run<G: Git + ?Sized>(self, git: &G) -> Result<(), PromoteError> {
        git.clone_repo(&self.url, &self.reference, &self.dest)
            .await
            .map_err(|source| PromoteError::Clone {
                url: self.url.clone(),
                source,
            })?;
        if let Some(fork) = self.fork {
            git.add_remote(&self.dest, FORK_REMOTE, &fork)
                .await
                .map_err(|source| PromoteError::Clone { url: fork, source })?;
        }
        Ok(())
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), PromoteError> {
    if cancel.is_cancelled() {
        return Err(PromoteError::Cancelled);
    }
    Ok(())
}

/// Run one promotion end to end.
///
/// `git` is shared with the clone workers, which run on their own tasks.
pub async fn promote<G, M>(
    request: &PromotionRequest<'_>,
    git: Arc<G>,
    merge_requests: &M,
    cancel: &CancellationToken,
) -> Result<PromotionOutcome, PromoteError>
where
    G: Git + ?Sized + 'static,
    M: MergeRequests + ?Sized,
{
    let span = info_span!(
        "promotion",
        addon = request.addon,
        channel = request.channel,
        version = %request.version
    );
    let mut tracker = Tracker {
        state: PromotionState::Init,
    };
    let result = run_promotion(request, &git, merge_requests, cancel, &mut tracker)
        .instrument(span)
        .await;
    if let Err(e) = &result {
        warn!(
            state = %tracker.state,
            kind = %e.kind(),
            error = %e,
            "[PROMOTE] Promotion failed"
        );
    }
    result
}

async fn run_promotion<G, M>(
    request: &PromotionRequest<'_>,
    git: &Arc<G>,
    merge_requests: &M,
    cancel: &CancellationToken,
    tracker: &mut Tracker,
) -> Result<PromotionOutcome, PromoteError>
where
    G: Git + ?Sized + 'static,
    M: MergeRequests + ?Sized,
{
    let version = &request.version;
    let (addon, channel_cfg) =
        precheck(request.config, request.addon, request.channel, version)?;
    let channel = channel_cfg.name;
    let branch = working_branch(&addon.name, channel, version);
    let mr_spec = MergeRequestSpec {
        source_project: request.fork.project.clone(),
        source_branch: branch.clone(),
        target_project: request.origin.project.clone(),
        target_branch: MAIN_BRANCH.to_string(),
        title: format!("Update {} {} to {}", addon.name, channel, version),
        description: request.description.clone(),
        remove_source_branch: true,
    };

    if let Some(existing) = find_open(merge_requests, &mr_spec).await? {
        info!(url = %existing.web_url, "[PROMOTE] Merge request already open, nothing to do");
        tracker.advance(PromotionState::SkippedAlreadyOpen);
        return Ok(PromotionOutcome {
            state: PromotionState::SkippedAlreadyOpen,
            branch,
            commit: None,
            merge_request: existing,
            job: None,
        });
    }

    // Clone
    ensure_active(cancel)?;
    let run_id = Uuid::new_v4();
    let mt_dir = request.work_root.join(format!("managed-tenants-{run_id}"));
    let operator_dir = request.work_root.join(format!("operator-{run_id}"));
    let clones = vec![
        CloneJob {
            url: request.origin.url.clone(),
            reference: MAIN_BRANCH.to_string(),
            dest: mt_dir.clone(),
            fork: Some(request.fork.url.clone()),
        },
        CloneJob {
            url: addon.bundle.repo.clone(),
            reference: version.tag(),
            dest: operator_dir.clone(),
            fork: None,
        },
    ];
    let tasks: Vec<_> = clones
        .into_iter()
        .map(|job| {
            let git = Arc::clone(git);
            move || async move { job.run(&*git).await }
        })
        .collect();
    runner::run(tasks, CLONE_WORKERS, cancel).await?;
    tracker.advance(PromotionState::Cloned);

    // Branch
    ensure_active(cancel)?;
    let head = git
        .current_branch(&mt_dir)
        .await
        .map_err(|source| PromoteError::Branch {
            branch: branch.clone(),
            source,
        })?;
    if head != MAIN_BRANCH {
        return Err(PromoteError::NotOnMain {
            repo: mt_dir,
            branch: head,
        });
    }
    let resumed = git
        .remote_branch_exists(&mt_dir, FORK_REMOTE, &branch)
        .await
        .map_err(|source| PromoteError::Branch {
            branch: branch.clone(),
            source,
        })?;
    let branched = if resumed {
        info!(branch = %branch, "[PROMOTE] Fork already has the working branch, resuming it");
        git.track_remote_branch(&mt_dir, FORK_REMOTE, &branch).await
    } else {
        git.create_branch(&mt_dir, &branch).await
    };
    branched.map_err(|source| PromoteError::Branch {
        branch: branch.clone(),
        source,
    })?;
    tracker.advance(PromotionState::Branched);

    // Copy bundle
    ensure_active(cancel)?;
    let channel_root = PathBuf::from("addons").join(&channel_cfg.directory);
    let bundles_dir = mt_dir.join(&channel_root).join("main");
    let source_bundle = operator_dir.join(&addon.bundle.path).join(version.base());
    let dest_bundle = bundles_dir.join(version.base());
    if !source_bundle.is_dir() {
        return Err(PromoteError::BundleMissing {
            path: source_bundle,
        });
    }
    let previous = CsvSet::load(&bundles_dir, addon.olm_type)?
        .predecessor_of(version)
        .map(|c| c.name.clone());
    if dest_bundle.exists() {
        fs::remove_dir_all(&dest_bundle).map_err(|source| PromoteError::Copy {
            path: dest_bundle.clone(),
            source,
        })?;
    }
    let copied = copy_bundle(&source_bundle, &dest_bundle).map_err(|source| PromoteError::Copy {
        path: dest_bundle.clone(),
        source,
    })?;
    info!(files = copied, dest = %dest_bundle.display(), "[PROMOTE] Bundle copied");
    tracker.advance(PromotionState::BundleCopied);

    let mut job = PromotionJob {
        managed_tenants_dir: mt_dir.clone(),
        operator_dir: operator_dir.clone(),
        source_bundle,
        dest_bundle: dest_bundle.clone(),
        source_remote: addon.bundle.repo.clone(),
        dest_remote: request.fork.url.clone(),
        csv_file: None,
        package_file: None,
        image_set_file: None,
    };

    // Mutate manifests
    ensure_active(cancel)?;
    let operator_name = channel.operator_name(addon.operator());
    let new_csv = csv_name(&operator_name, version);

    let package_file = PackageManifest::find(&bundles_dir)?;
    let mut package = PackageManifest::load(&package_file)?;
    package.set_current_csv(&package_file, &new_csv)?;
    package.write(&package_file)?;
    job.package_file = Some(package_file);

    let mut csv = CsvDocument::load_from_bundle(&dest_bundle)?;
    mutate_csv(
        &mut csv,
        request.config,
        addon,
        &new_csv,
        previous.as_deref(),
        version,
    )?;
    csv.write()?;
    job.csv_file = Some(csv.path().to_path_buf());

    if channel.carries_image_set() {
        let stage = addon
            .channel(Channel::Stage)
            .ok_or_else(|| ManifestError::shape(&mt_dir, "a stage channel for addon image sets"))?;
        let stage_dir = mt_dir
            .join("addons")
            .join(&stage.directory)
            .join("addonimagesets")
            .join(&stage.environment);
        let dest_dir = mt_dir
            .join(&channel_root)
            .join("addonimagesets")
            .join(&channel_cfg.environment);
        job.image_set_file = Some(copy_image_set_forward(
            &stage_dir,
            &dest_dir,
            &channel_cfg.directory,
            version,
        )?);
    }
    tracker.advance(PromotionState::ManifestsUpdated);

    // Commit
    ensure_active(cancel)?;
    let pathspec = channel_root.to_string_lossy().into_owned();
    git.stage(&mt_dir, &pathspec)
        .await
        .map_err(|source| PromoteError::Commit { source })?;
    let pending = git
        .status(&mt_dir)
        .await
        .map_err(|source| PromoteError::Commit { source })?;
    let commit = if pending.is_empty() {
        info!("[PROMOTE] Nothing changed since the previous run, skipping commit");
        None
    } else {
        let message = format!("update {} {} to {}", addon.name, channel, version);
        let sha = git
            .commit(&mt_dir, &message, &request.config.author)
            .await
            .map_err(|source| PromoteError::Commit { source })?;
        info!(commit = %sha, "[PROMOTE] Changes committed");
        Some(sha)
    };
    let dirty = git
        .status(&mt_dir)
        .await
        .map_err(|source| PromoteError::Commit { source })?;
    if !dirty.is_empty() {
        return Err(PromoteError::DirtyTree { entries: dirty });
    }
    tracker.advance(PromotionState::Committed);

    // Push
    ensure_active(cancel)?;
    git.push(&mt_dir, FORK_REMOTE, &branch, request.token.clone())
        .await
        .map_err(|source| PromoteError::Push {
            branch: branch.clone(),
            source,
        })?;
    tracker.advance(PromotionState::Pushed);

    // Merge request
    ensure_active(cancel)?;
    let (merge_request, final_state) = match find_open(merge_requests, &mr_spec).await? {
        Some(existing) => (existing, PromotionState::SkippedAlreadyOpen),
        None => {
            let created = merge_requests
                .create(&mr_spec)
                .await
                .map_err(|source| PromoteError::MergeRequest { source })?;
            info!(url = %created.web_url, "[PROMOTE] Merge request opened");
            (created, PromotionState::Done)
        }
    };
    tracker.advance(PromotionState::MrOpened);

    git.checkout(&mt_dir, MAIN_BRANCH)
        .await
        .map_err(|source| PromoteError::Teardown { source })?;
    tracker.advance(final_state);

    Ok(PromotionOutcome {
        state: final_state,
        branch,
        commit,
        merge_request,
        job: Some(job),
    })
}

async fn find_open<M: MergeRequests + ?Sized>(
    merge_requests: &M,
    spec: &MergeRequestSpec,
) -> Result<Option<MergeRequest>, PromoteError> {
    merge_requests
        .find_open(spec)
        .await
        .map_err(|source| PromoteError::MergeRequest { source })
}

fn mutate_csv(
    csv: &mut CsvDocument,
    config: &ReleaseConfig,
    addon: &AddonConfig,
    name: &str,
    replaces: Option<&str>,
    version: &Version,
) -> Result<(), ManifestError> {
    csv.set_name(name)?;
    csv.set_replaces(replaces)?;

    if let Some(over) = &addon.override_env {
        csv.clear_env(&over.deployment.name, &over.deployment.container.name)?;
    }

    let container = config.operator_container.as_str();
    if addon.olm_type.removes_cluster_storage() {
        csv.remove_env(container, USE_CLUSTER_STORAGE)?;
    } else {
        csv.upsert_env(container, USE_CLUSTER_STORAGE, &config.use_cluster_storage)?;
    }
    let recipient = if version.is_pre_release() {
        &config.alerting.pre_release
    } else {
        &config.alerting.release
    };
    csv.upsert_env(container, ALERTING_EMAIL_ADDRESS, recipient)?;
    csv.set_install_mode(SINGLE_NAMESPACE, true)
}

/// Recursive copy that keeps file modes and leaves out build-only files.
fn copy_bundle(src: &Path, dest: &Path) -> io::Result<usize> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if SKIPPED_BUNDLE_FILES.iter().any(|s| name == *s) {
            continue;
        }
        let target = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copied += copy_bundle(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    Created,
    AlreadyPresent,
}

/// Create `tag` at `sha`, succeeding if it already points there.
pub async fn tag_source<T: SourceTags + ?Sized>(
    tags: &T,
    repo: &str,
    tag: &str,
    sha: &str,
) -> Result<TagOutcome, PromoteError> {
    match tags
        .tag_target(repo, tag)
        .await
        .map_err(|source| PromoteError::Tag { source })?
    {
        Some(existing) if existing == sha => {
            info!(repo, tag, sha, "[TAG] Tag already present at the requested commit");
            Ok(TagOutcome::AlreadyPresent)
        }
        Some(existing) => Err(PromoteError::TagConflict {
            tag: tag.to_string(),
            existing,
            requested: sha.to_string(),
        }),
        None => {
            tags.create_tag(repo, tag, sha)
                .await
                .map_err(|source| PromoteError::Tag { source })?;
            info!(repo, tag, sha, "[TAG] Tag created");
            Ok(TagOutcome::Created)
        }
    }
}

/// Tag the head of `branch` (default: the version's release branch) with the
/// version tag. Returns the outcome and the tagged SHA.
pub async fn tag_release<T: SourceTags + ?Sized>(
    tags: &T,
    repo: &str,
    version: &Version,
    branch: Option<&str>,
) -> Result<(TagOutcome, String), PromoteError> {
    let branch = branch
        .map(str::to_string)
        .unwrap_or_else(|| version.release_branch());
    let sha = tags
        .branch_head(repo, &branch)
        .await
        .map_err(|source| PromoteError::Tag { source })?;
    let outcome = tag_source(tags, repo, &version.tag(), &sha).await?;
    Ok((outcome, sha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockMergeRequests, MockSourceTags};
    use crate::error::{ErrorKind, GitError};

    fn config() -> ReleaseConfig {
        serde_yaml::from_str(
            r#"
addons:
  - name: rhmi
    bundle:
      repo: /nonexistent/operator
      path: bundles
    channels:
      - name: stage
        directory: rhmi-stage
        environment: stage
      - name: edge
        directory: rhmi-internal
        environment: edge
"#,
        )
        .unwrap()
    }

    #[test]
    fn precheck_rejects_pre_release_outside_stage() {
        let cfg = config();
        let rc: Version = "1.1.0-rc1".parse().unwrap();
        let err = precheck(&cfg, "rhmi", "edge", &rc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(precheck(&cfg, "rhmi", "stage", &rc).is_ok());
    }

    #[test]
    fn precheck_rejects_unknown_channel_and_addon() {
        let cfg = config();
        let v: Version = "1.1.0".parse().unwrap();
        assert!(matches!(
            precheck(&cfg, "rhmi", "beta", &v),
            Err(PromoteError::UnknownChannel { .. })
        ));
        assert!(matches!(
            precheck(&cfg, "rhmi", "stable", &v),
            Err(PromoteError::UnknownChannel { .. })
        ));
        assert!(matches!(
            precheck(&cfg, "other", "stage", &v),
            Err(PromoteError::UnknownAddon(_))
        ));
    }

    #[test]
    fn branch_name_is_deterministic() {
        let v: Version = "1.1.0".parse().unwrap();
        assert_eq!(working_branch("rhmi", Channel::Edge, &v), "rhmi-edge-v1.1.0");
    }

    #[tokio::test]
    async fn open_merge_request_short_circuits_before_cloning() {
        let cfg = config();
        let mut mrs = MockMergeRequests::new();
        mrs.expect_find_open().times(1).returning(|spec| {
            Ok(Some(MergeRequest {
                iid: 7,
                web_url: "https://gitlab.example.com/mt/-/merge_requests/7".into(),
                source_branch: spec.source_branch.clone(),
            }))
        });
        mrs.expect_create().never();
        let git = Arc::new(crate::contract::MockGit::new());

        let request = PromotionRequest {
            config: &cfg,
            addon: "rhmi",
            channel: "stage",
            version: "1.1.0".parse().unwrap(),
            origin: Remote {
                url: "/nonexistent/origin".into(),
                project: "service/managed-tenants".into(),
            },
            fork: Remote {
                url: "/nonexistent/fork".into(),
                project: "bot/managed-tenants".into(),
            },
            token: None,
            description: String::new(),
            work_root: std::env::temp_dir(),
        };
        let outcome = promote(&request, git, &mrs, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, PromotionState::SkippedAlreadyOpen);
        assert_eq!(outcome.branch, "rhmi-stage-v1.1.0");
        assert!(outcome.job.is_none());
    }

    fn request_at<'a>(cfg: &'a ReleaseConfig, work_root: &Path) -> PromotionRequest<'a> {
        PromotionRequest {
            config: cfg,
            addon: "rhmi",
            channel: "stage",
            version: "1.1.0".parse().unwrap(),
            origin: Remote {
                url: "/nonexistent/origin".into(),
                project: "service/managed-tenants".into(),
            },
            fork: Remote {
                url: "/nonexistent/fork".into(),
                project: "bot/managed-tenants".into(),
            },
            token: None,
            description: String::new(),
            work_root: work_root.to_path_buf(),
        }
    }

    fn no_open_merge_request() -> MockMergeRequests {
        let mut mrs = MockMergeRequests::new();
        mrs.expect_find_open().returning(|_| Ok(None));
        mrs.expect_create().never();
        mrs
    }

    #[tokio::test]
    async fn both_repositories_are_cloned_before_branching() {
        let cfg = config();
        let work = tempfile::tempdir().unwrap();
        let request = request_at(&cfg, work.path());

        let mut git = crate::contract::MockGit::new();
        git.expect_clone_repo()
            .withf(|url, reference, dest| {
                let dir = dest.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                (url == "/nonexistent/origin" && reference == "main" && dir.starts_with("managed-tenants-"))
                    || (url == "/nonexistent/operator" && reference == "v1.1.0" && dir.starts_with("operator-"))
            })
            .times(2)
            .returning(|_, _, _| Ok(()));
        git.expect_add_remote()
            .withf(|repo, name, url| {
                let dir = repo.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                dir.starts_with("managed-tenants-") && name == FORK_REMOTE && url == "/nonexistent/fork"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        git.expect_current_branch()
            .times(1)
            .returning(|_| Ok("feature".to_string()));

        let err = promote(
            &request,
            Arc::new(git),
            &no_open_merge_request(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PromoteError::NotOnMain { ref branch, .. } if branch == "feature"));
    }

    #[tokio::test]
    async fn failed_operator_clone_names_the_operator_repo() {
        let cfg = config();
        let work = tempfile::tempdir().unwrap();
        let request = request_at(&cfg, work.path());

        let mut git = crate::contract::MockGit::new();
        git.expect_clone_repo().returning(|url, _, _| {
            if url == "/nonexistent/operator" {
                Err(GitError::Failed {
                    command: "git clone".into(),
                    status: Some(128),
                    stderr: "Remote branch v1.1.0 not found".into(),
                })
            } else {
                Ok(())
            }
        });
        git.expect_add_remote().returning(|_, _, _| Ok(()));
        git.expect_current_branch().never();

        let err = promote(
            &request,
            Arc::new(git),
            &no_open_merge_request(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(&err, PromoteError::Clone { url, .. } if url == "/nonexistent/operator"));
    }

    #[tokio::test]
    async fn tag_source_is_idempotent() {
        let mut tags = MockSourceTags::new();
        tags.expect_tag_target()
            .returning(|_, _| Ok(Some("abc123".to_string())));
        tags.expect_create_tag().never();

        let outcome = tag_source(&tags, "org/operator", "v1.0.0", "abc123")
            .await
            .unwrap();
        assert_eq!(outcome, TagOutcome::AlreadyPresent);

        let err = tag_source(&tags, "org/operator", "v1.0.0", "def456")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn tag_release_creates_missing_tag_on_release_branch() {
        let mut tags = MockSourceTags::new();
        tags.expect_branch_head()
            .withf(|repo, branch| repo == "org/operator" && branch == "rhoam-release-v1.2")
            .returning(|_, _| Ok("cafe".to_string()));
        tags.expect_tag_target().returning(|_, _| Ok(None));
        tags.expect_create_tag()
            .withf(|_, tag, sha| tag == "rhoam-v1.2.0" && sha == "cafe")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let version = Version::parse("1.2.0", crate::version::OlmType::ManagedApiService).unwrap();
        let (outcome, sha) = tag_release(&tags, "org/operator", &version, None)
            .await
            .unwrap();
        assert_eq!(outcome, TagOutcome::Created);
        assert_eq!(sha, "cafe");
    }
}
