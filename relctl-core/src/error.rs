//! Error taxonomy shared by every core component.
//!
//! Each component owns a `thiserror` enum. Every enum maps onto a single
//! [`ErrorKind`] so the CLI can report failures uniformly without knowing the
//! concrete component that produced them.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runner::RunError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Precondition,
    Graph,
    ManifestShape,
    Remote,
    Conflict,
    Timeout,
    Cancelled,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Input => "InputError",
            ErrorKind::Precondition => "PreconditionError",
            ErrorKind::Graph => "GraphError",
            ErrorKind::ManifestShape => "ManifestShapeError",
            ErrorKind::Remote => "RemoteError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "IoError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,
    #[error("version {0:?} has an empty build suffix")]
    EmptyBuild(String),
    #[error("version {0:?} contains more than one '-' separator")]
    TooManySeparators(String),
    #[error("version {0:?} is not of the form MAJOR.MINOR.PATCH[-BUILD]")]
    Malformed(String),
    #[error("version {input:?}: {part:?} is not a non-negative integer")]
    NonNumeric { input: String, part: String },
}

impl VersionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Input
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{file}: expected {what}")]
    Shape { file: PathBuf, what: String },
    #[error("failed to read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: {source}")]
    Version {
        path: PathBuf,
        #[source]
        source: VersionError,
    },
}

impl ManifestError {
    pub fn shape(file: impl Into<PathBuf>, what: impl Into<String>) -> Self {
        ManifestError::Shape {
            file: file.into(),
            what: what.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManifestError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::Shape { .. } | ManifestError::Yaml { .. } => ErrorKind::ManifestShape,
            ManifestError::Io { .. } => ErrorKind::Io,
            ManifestError::Version { .. } => ErrorKind::Input,
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    /// An empty `missing` means the CSV sits above the root without a
    /// `replaces` edge.
    #[error("[{}] {}", dir.display(), incomplete_reason(csv, missing))]
    Incomplete {
        dir: PathBuf,
        csv: String,
        missing: String,
    },
    #[error("[{}] no CSVs found", dir.display())]
    Empty { dir: PathBuf },
    #[error("[{}] replaces chain starting at {csv} loops back on itself", dir.display())]
    Cycle { dir: PathBuf, csv: String },
    #[error("[{}] CSV name {name} appears more than once", dir.display())]
    DuplicateName { dir: PathBuf, name: String },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn incomplete_reason(csv: &str, missing: &str) -> String {
    if missing.is_empty() {
        format!("CSV {csv} has no replaces but is not the lowest version")
    } else {
        format!("CSV {csv} replaces {missing}, which is not part of the set")
    }
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Manifest(e) => e.kind(),
            GraphError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Graph,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("every bundle version is newer than the production version {production}")]
    AllNewerThanProduction { production: String },
    #[error("no major versions left to select (max majors = {max_majors})")]
    NoMajors { max_majors: usize },
}

impl SelectError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Precondition
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status:?}: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GitError::Spawn { .. } => ErrorKind::Io,
            GitError::Failed { .. } => ErrorKind::Remote,
        }
    }
}

/// Failure reported by a remote API (merge requests, object store, sinks, cloud).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: String,
        status: u16,
        body: String,
    },
    #[error("{service} request failed: {message}")]
    Transport { service: String, message: String },
    #[error("{service} response could not be decoded: {message}")]
    Decode { service: String, message: String },
}

impl RemoteError {
    pub fn transport(service: impl Into<String>, message: impl fmt::Display) -> Self {
        RemoteError::Transport {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(service: impl Into<String>, message: impl fmt::Display) -> Self {
        RemoteError::Decode {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Remote
    }
}

/// One variant per promotion step, so a failure always names the step that broke.
#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("addon {0} is not declared in the release configuration")]
    UnknownAddon(String),
    #[error("addon {addon} has no channel named {channel}")]
    UnknownChannel { addon: String, channel: String },
    #[error("pre-release version {version} cannot be promoted to the {channel} channel")]
    PreReleaseNotAllowed { version: String, channel: String },
    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: GitError,
    },
    #[error("expected {repo} to be on branch main, found {branch}")]
    NotOnMain { repo: PathBuf, branch: String },
    #[error("failed to create working branch {branch}: {source}")]
    Branch {
        branch: String,
        #[source]
        source: GitError,
    },
    #[error("bundle directory {} does not exist", path.display())]
    BundleMissing { path: PathBuf },
    #[error("failed to copy bundle into {}: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("failed to commit changes: {source}")]
    Commit {
        #[source]
        source: GitError,
    },
    #[error("working tree is dirty after commit: {}", entries.join(", "))]
    DirtyTree { entries: Vec<String> },
    #[error("failed to push {branch} to the fork: {source}")]
    Push {
        branch: String,
        #[source]
        source: GitError,
    },
    #[error("failed to open merge request: {source}")]
    MergeRequest {
        #[source]
        source: RemoteError,
    },
    #[error("failed to restore main after promotion: {source}")]
    Teardown {
        #[source]
        source: GitError,
    },
    #[error("tag {tag} already points at {existing}, refusing to move it to {requested}")]
    TagConflict {
        tag: String,
        existing: String,
        requested: String,
    },
    #[error("failed to tag source repository: {source}")]
    Tag {
        #[source]
        source: RemoteError,
    },
    #[error("clone worker failed: {0}")]
    Worker(String),
    #[error("promotion cancelled")]
    Cancelled,
}

impl PromoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PromoteError::UnknownAddon(_) | PromoteError::UnknownChannel { .. } => {
                ErrorKind::Input
            }
            PromoteError::PreReleaseNotAllowed { .. }
            | PromoteError::NotOnMain { .. }
            | PromoteError::DirtyTree { .. }
            | PromoteError::BundleMissing { .. } => ErrorKind::Precondition,
            PromoteError::Clone { source, .. }
            | PromoteError::Branch { source, .. }
            | PromoteError::Commit { source }
            | PromoteError::Push { source, .. }
            | PromoteError::Teardown { source } => source.kind(),
            PromoteError::Copy { .. } | PromoteError::Worker(_) => ErrorKind::Io,
            PromoteError::Manifest(e) => e.kind(),
            PromoteError::Graph(e) => e.kind(),
            PromoteError::MergeRequest { .. } | PromoteError::Tag { .. } => ErrorKind::Remote,
            PromoteError::TagConflict { .. } => ErrorKind::Conflict,
            PromoteError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RunError<PromoteError>> for PromoteError {
    fn from(e: RunError<PromoteError>) -> Self {
        match e {
            RunError::Task(inner) => inner,
            RunError::Cancelled => PromoteError::Cancelled,
            RunError::Panicked(msg) => PromoteError::Worker(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("[{key}] {message}")]
    Artifact { key: String, message: String },
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{sink} job {job} finished with status {status}")]
    SinkFailed {
        sink: String,
        job: String,
        status: String,
    },
    #[error("{sink} job {job} did not finish within {waited:?}")]
    Timeout {
        sink: String,
        job: String,
        waited: Duration,
    },
    #[error("import worker failed: {0}")]
    Worker(String),
    #[error("import cancelled")]
    Cancelled,
}

impl ImportError {
    pub fn artifact(key: impl Into<String>, message: impl fmt::Display) -> Self {
        ImportError::Artifact {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::Remote(_) | ImportError::SinkFailed { .. } => ErrorKind::Remote,
            ImportError::Artifact { .. } => ErrorKind::Input,
            ImportError::Io { .. } | ImportError::Worker(_) => ErrorKind::Io,
            ImportError::Timeout { .. } => ErrorKind::Timeout,
            ImportError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RunError<ImportError>> for ImportError {
    fn from(e: RunError<ImportError>) -> Self {
        match e {
            RunError::Task(inner) => inner,
            RunError::Cancelled => ImportError::Cancelled,
            RunError::Panicked(msg) => ImportError::Worker(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("resources for cluster {cluster_id} still present after {waited:?}")]
    Timeout { cluster_id: String, waited: Duration },
    #[error("sweep worker failed: {0}")]
    Worker(String),
    #[error("sweep cancelled")]
    Cancelled,
}

impl SweepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SweepError::Remote(_) => ErrorKind::Remote,
            SweepError::Timeout { .. } => ErrorKind::Timeout,
            SweepError::Worker(_) => ErrorKind::Io,
            SweepError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RunError<SweepError>> for SweepError {
    fn from(e: RunError<SweepError>) -> Self {
        match e {
            RunError::Task(inner) => inner,
            RunError::Cancelled => SweepError::Cancelled,
            RunError::Panicked(msg) => SweepError::Worker(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("[{bucket}] {source}")]
    Remote {
        bucket: String,
        #[source]
        source: RemoteError,
    },
    #[error("archive worker failed: {0}")]
    Worker(String),
    #[error("archive cancelled")]
    Cancelled,
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Remote { .. } => ErrorKind::Remote,
            ArchiveError::Worker(_) => ErrorKind::Io,
            ArchiveError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RunError<ArchiveError>> for ArchiveError {
    fn from(e: RunError<ArchiveError>) -> Self {
        match e {
            RunError::Task(inner) => inner,
            RunError::Cancelled => ArchiveError::Cancelled,
            RunError::Panicked(msg) => ArchiveError::Worker(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query {name}: {source}")]
    Remote {
        name: String,
        #[source]
        source: RemoteError,
    },
    #[error("query {name} did not answer within {waited:?}")]
    Timeout { name: String, waited: Duration },
    #[error("failed to write report {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("query worker failed: {0}")]
    Worker(String),
    #[error("query batch cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Remote { .. } => ErrorKind::Remote,
            QueryError::Timeout { .. } => ErrorKind::Timeout,
            QueryError::Io { .. } | QueryError::Encode(_) | QueryError::Worker(_) => ErrorKind::Io,
            QueryError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RunError<QueryError>> for QueryError {
    fn from(e: RunError<QueryError>) -> Self {
        match e {
            RunError::Task(inner) => inner,
            RunError::Cancelled => QueryError::Cancelled,
            RunError::Panicked(msg) => QueryError::Worker(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_errors_map_to_taxonomy() {
        let cases = vec![
            (
                PromoteError::PreReleaseNotAllowed {
                    version: "1.1.0-rc1".into(),
                    channel: "edge".into(),
                },
                ErrorKind::Precondition,
            ),
            (
                PromoteError::UnknownChannel {
                    addon: "rhoams".into(),
                    channel: "beta".into(),
                },
                ErrorKind::Input,
            ),
            (
                PromoteError::TagConflict {
                    tag: "v1.0.0".into(),
                    existing: "abc".into(),
                    requested: "def".into(),
                },
                ErrorKind::Conflict,
            ),
            (
                PromoteError::Manifest(ManifestError::shape("csv.yaml", "container operator")),
                ErrorKind::ManifestShape,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "unexpected kind for {err}");
        }
    }

    #[test]
    fn run_error_flattens_into_import_error() {
        let err: ImportError = RunError::Task(ImportError::Cancelled).into();
        assert!(matches!(err, ImportError::Cancelled));
        let err: ImportError = RunError::<ImportError>::Panicked("boom".into()).into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
