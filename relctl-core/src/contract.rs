//! # contract: interfaces to every external collaborator
//!
//! The core never talks to a remote system directly. Git, merge-request hosts,
//! source-tag hosts, object stores, reporting sinks, the metrics API and cloud
//! resource APIs are all reached through the traits below, so the CLI crate can plug in real
//! clients and the test suites can plug in `mockall` mocks.
//!
//! ## Mocking & Testing
//! - Every trait is annotated with `automock` under `cfg(test)` or the
//!   `test-export-mocks` feature, which is on by default so integration tests
//!   in `tests/` and the CLI crate can import `MockGit`, `MockObjectStore`, ...
//!
//! ## Errors
//! - Git operations fail with [`GitError`], remote APIs with [`RemoteError`].
//!   Reporting sinks return [`ImportError`] because they may also fail while
//!   reading the local artifact they submit.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::{GitError, ImportError, RemoteError};

/// Author and committer identity used for bot commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

/// Local git working trees. Implemented over the `git` binary by
/// [`crate::git::GitCli`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Git: Send + Sync {
    /// Clone `url` into `dest` and check out `reference` (branch or tag).
    async fn clone_repo(&self, url: &str, reference: &str, dest: &Path) -> Result<(), GitError>;

    async fn add_remote(&self, repo: &Path, name: &str, url: &str) -> Result<(), GitError>;

    async fn current_branch(&self, repo: &Path) -> Result<String, GitError>;

    async fn remote_branch_exists(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<bool, GitError>;

    /// Create `branch` from HEAD and switch to it.
    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError>;

    /// Fetch `remote/branch` and switch to a local branch tracking it.
    async fn track_remote_branch(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<(), GitError>;

    async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError>;

    async fn stage(&self, repo: &Path, pathspec: &str) -> Result<(), GitError>;

    /// Commit staged changes and return the new commit SHA.
    async fn commit(
        &self,
        repo: &Path,
        message: &str,
        author: &Signature,
    ) -> Result<String, GitError>;

    /// Porcelain status entries; empty means a clean tree.
    async fn status(&self, repo: &Path) -> Result<Vec<String>, GitError>;

    /// Push `branch` to `remote` without force.
    async fn push(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
        token: Option<String>,
    ) -> Result<(), GitError>;
}

/// What a merge request should look like; also the key used to find an
/// existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestSpec {
    pub source_project: String,
    pub source_branch: String,
    pub target_project: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub remove_source_branch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    pub web_url: String,
    pub source_branch: String,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MergeRequests: Send + Sync {
    /// An open merge request with the same source and target, if any.
    async fn find_open(&self, spec: &MergeRequestSpec)
        -> Result<Option<MergeRequest>, RemoteError>;

    async fn create(&self, spec: &MergeRequestSpec) -> Result<MergeRequest, RemoteError>;
}

/// Tags on the operator source repository.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceTags: Send + Sync {
    async fn branch_head(&self, repo: &str, branch: &str) -> Result<String, RemoteError>;

    /// SHA the tag points at, or `None` if the tag does not exist.
    async fn tag_target(&self, repo: &str, tag: &str) -> Result<Option<String>, RemoteError>;

    async fn create_tag(&self, repo: &str, tag: &str, sha: &str) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTag {
    pub key: String,
    pub value: String,
}

impl ObjectTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        ObjectTag {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<String>,
    ) -> Result<Vec<ObjectSummary>, RemoteError>;

    async fn get_tags(&self, bucket: &str, key: &str) -> Result<Vec<ObjectTag>, RemoteError>;

    /// Replace the full tag set of an object.
    async fn put_tags(
        &self,
        bucket: &str,
        key: &str,
        tags: Vec<ObjectTag>,
    ) -> Result<(), RemoteError>;

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), RemoteError>;

    /// Server-side copy within one bucket.
    async fn copy_object(&self, bucket: &str, source: &str, dest: &str) -> Result<(), RemoteError>;

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), RemoteError>;
}

/// One artifact ready for a reporting sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub key: String,
    pub name: String,
    pub version: Option<String>,
    pub job_url: Option<String>,
    /// File uploaded to the sink; may be the downloaded object or a file
    /// derived from it.
    pub payload: PathBuf,
    /// SHA-256 of the downloaded object.
    pub content_sha256: String,
}

/// Result of running a transformer over a downloaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    Submit(Submission),
    Skip(String),
}

/// Turns a downloaded object into a sink submission.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ArtifactTransformer: Send + Sync {
    /// `workdir` is scratch space owned by the caller for the duration of the
    /// submission. `content_sha256` is the digest of `artifact`.
    fn prepare(
        &self,
        key: &str,
        artifact: &Path,
        content_sha256: &str,
        workdir: &Path,
    ) -> Result<Prepared, ImportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> String;

    /// Submit the artifact and return the sink's job identifier.
    async fn submit(&self, submission: &Submission) -> Result<String, ImportError>;

    async fn status(&self, job_id: &str) -> Result<JobStatus, ImportError>;
}

/// `data` of a Prometheus query response: the result type and the raw result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryValue {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: serde_json::Value,
}

/// Prometheus HTTP query API. Times are Unix seconds.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MetricsApi: Send + Sync {
    async fn query(&self, query: &str, time: i64) -> Result<QueryValue, RemoteError>;

    async fn query_range(
        &self,
        query: &str,
        start: i64,
        end: i64,
        step_secs: u64,
    ) -> Result<QueryValue, RemoteError>;
}

/// Cloud resource classes, in deletion order (leaves first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    RdsInstance,
    CacheCluster,
    Snapshot,
    Bucket,
    VpcPeering,
    SecurityGroup,
    RouteTable,
    Subnet,
    Vpc,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::RdsInstance => "rds-instance",
            ResourceKind::CacheCluster => "cache-cluster",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Bucket => "bucket",
            ResourceKind::VpcPeering => "vpc-peering",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Vpc => "vpc",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
}

/// Tag filter selecting the resources of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub cluster_id: String,
    pub extra: Vec<(String, String)>,
}

impl TagFilter {
    pub const CLUSTER_TAG: &'static str = "cluster-id";

    pub fn new(cluster_id: impl Into<String>) -> Self {
        TagFilter {
            cluster_id: cluster_id.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Every `(key, value)` pair a resource must carry.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(Self::CLUSTER_TAG.to_string(), self.cluster_id.clone())];
        pairs.extend(self.extra.iter().cloned());
        pairs
    }

    pub fn matches<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        self.pairs().iter().all(|(k, v)| {
            tags.clone()
                .into_iter()
                .any(|(tk, tv)| tk == k.as_str() && tv == v.as_str())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Deletion accepted but not finished yet (e.g. a database shutting down).
    InProgress,
    NotFound,
    /// Something still references the resource.
    DependencyViolation(String),
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ResourceClass: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError>;

    async fn delete(&self, resource: &Resource) -> Result<DeleteOutcome, RemoteError>;
}
