//! Idempotent batch import from an object bucket into a reporting sink.
//!
//! Every object in the bucket runs through the same sequential pipeline:
//! filter, tag check, download, transform, submit, poll, tag. The processed
//! tag is the commit point. An object is only tagged once its sink job has
//! succeeded, so any failure before that leaves it eligible for the next run.
//!
//! Objects fan out through [`crate::runner::run`]; the importer itself holds
//! no mutable state.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::contract::{
    ArtifactTransformer, JobStatus, ObjectStore, ObjectTag, Prepared, ReportSink,
};
use crate::error::ImportError;
use crate::runner;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Name of the descriptor carried inside every imported archive.
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub bucket: String,
    pub processed_tag: ObjectTag,
    pub key_prefix: Option<String>,
    pub key_suffix: Option<String>,
    pub workers: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    /// When false the processed tag is never written (debug runs).
    pub write_tags: bool,
}

impl ImportSettings {
    pub fn new(bucket: impl Into<String>, processed_tag: ObjectTag) -> Self {
        ImportSettings {
            bucket: bucket.into(),
            processed_tag,
            key_prefix: None,
            key_suffix: None,
            workers: DEFAULT_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            write_tags: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.key_suffix = Some(suffix.into());
        self
    }

    pub fn accepts(&self, key: &str) -> bool {
        let prefix_ok = self
            .key_prefix
            .as_deref()
            .map_or(true, |p| key.starts_with(p));
        let suffix_ok = self
            .key_suffix
            .as_deref()
            .map_or(true, |s| key.ends_with(s));
        prefix_ok && suffix_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    Filtered,
    AlreadyProcessed,
    /// Transformer declined the artifact.
    Skipped(String),
    Imported { job: String, tagged: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReport {
    pub key: String,
    pub outcome: ObjectOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub objects: Vec<ObjectReport>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| matches!(o.outcome, ObjectOutcome::Imported { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| matches!(o.outcome, ObjectOutcome::Skipped(_)))
            .count()
    }

    pub fn already_processed(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| o.outcome == ObjectOutcome::AlreadyProcessed)
            .count()
    }
}

#[derive(Clone)]
pub struct Importer {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn ReportSink>,
    transformer: Arc<dyn ArtifactTransformer>,
    settings: Arc<ImportSettings>,
}

impl Importer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn ReportSink>,
        transformer: Arc<dyn ArtifactTransformer>,
        settings: ImportSettings,
    ) -> Self {
        Importer {
            store,
            sink,
            transformer,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Import every object of the bucket. The first failing object stops the
    /// batch; objects already tagged stay tagged.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ImportReport, ImportError> {
        let sink = self.sink.name();
        let objects = self
            .store
            .list_objects(&self.settings.bucket, self.settings.key_prefix.clone())
            .await?;
        info!(
            bucket = %self.settings.bucket,
            sink = %sink,
            objects = objects.len(),
            workers = self.settings.workers,
            "[IMPORT] Listed bucket objects"
        );

        let tasks: Vec<_> = objects
            .into_iter()
            .map(|object| {
                let importer = self.clone();
                let cancel = cancel.clone();
                move || async move { importer.process_object(object.key, cancel).await }
            })
            .collect();

        let objects = runner::run(tasks, self.settings.workers, cancel).await?;
        let report = ImportReport { objects };
        info!(
            sink = %sink,
            imported = report.imported(),
            skipped = report.skipped(),
            already_processed = report.already_processed(),
            "[IMPORT] Batch finished"
        );
        Ok(report)
    }

    async fn process_object(
        &self,
        key: String,
        cancel: CancellationToken,
    ) -> Result<ObjectReport, ImportError> {
        let span = tracing::info_span!("import_object", key = %key);
        let outcome = self.pipeline(&key, &cancel).instrument(span).await?;
        Ok(ObjectReport { key, outcome })
    }

    async fn pipeline(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<ObjectOutcome, ImportError> {
        let settings = &self.settings;
        if !settings.accepts(key) {
            debug!("[IMPORT] Key does not match the configured filter");
            return Ok(ObjectOutcome::Filtered);
        }

        let mut tags = self.store.get_tags(&settings.bucket, key).await?;
        if tags.contains(&settings.processed_tag) {
            debug!("[IMPORT] Already carries the processed tag");
            return Ok(ObjectOutcome::AlreadyProcessed);
        }
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        let workdir = tempfile::tempdir().map_err(|source| ImportError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let artifact = workdir.path().join(file_name_of(key));
        self.store
            .download(&settings.bucket, key, &artifact)
            .await?;
        let digest = sha256_file(&artifact).await?;
        debug!(sha256 = %digest, "[IMPORT] Downloaded object");

        let submission = match self
            .transformer
            .prepare(key, &artifact, &digest, workdir.path())?
        {
            Prepared::Submit(submission) => submission,
            Prepared::Skip(reason) => {
                info!(reason = %reason, "[IMPORT] Skipping object");
                return Ok(ObjectOutcome::Skipped(reason));
            }
        };

        let job = self.sink.submit(&submission).await?;
        info!(job = %job, name = %submission.name, "[IMPORT] Submitted to sink");
        wait_for_job(
            self.sink.as_ref(),
            &job,
            settings.poll_interval,
            settings.poll_timeout,
            cancel,
        )
        .await?;

        if !settings.write_tags {
            warn!(job = %job, "[IMPORT] Tag writing disabled, object stays untagged");
            return Ok(ObjectOutcome::Imported { job, tagged: false });
        }
        tags.push(settings.processed_tag.clone());
        self.store
            .put_tags(&settings.bucket, key, tags)
            .await
            .map_err(|e| {
                error!(error = %e, job = %job, "[IMPORT] Failed to write processed tag");
                e
            })?;
        info!(job = %job, "[IMPORT] Object imported and tagged");
        Ok(ObjectOutcome::Imported { job, tagged: true })
    }
}

/// Poll `job` until it reaches a terminal status. Cancellation is observed
/// each time the loop wakes up.
pub async fn wait_for_job(
    sink: &dyn ReportSink,
    job: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ImportError> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        match sink.status(job).await? {
            JobStatus::Succeeded => return Ok(()),
            JobStatus::Failed(status) => {
                return Err(ImportError::SinkFailed {
                    sink: sink.name(),
                    job: job.to_string(),
                    status,
                })
            }
            status => debug!(job, ?status, "[IMPORT] Sink job not finished yet"),
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(ImportError::Timeout {
                sink: sink.name(),
                job: job.to_string(),
                waited,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

fn file_name_of(key: &str) -> String {
    match key.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "artifact".to_string(),
    }
}

pub async fn sha256_file(path: &Path) -> Result<String, ImportError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// `metadata.json` inside an imported archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArchiveMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "rhmiVersion")]
    pub rhmi_version: Option<String>,
    #[serde(default, rename = "jobURL")]
    pub job_url: Option<String>,
}

/// Raw bytes of the entry `name` in the zip at `archive`. Entries nested
/// under a top-level folder match too. `None` when no entry matches.
pub fn read_archive_file(archive: &Path, name: &str) -> Result<Option<Vec<u8>>, ImportError> {
    let file = std::fs::File::open(archive).map_err(|source| ImportError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let key = archive.display().to_string();
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ImportError::artifact(&key, e))?;

    let suffix = format!("/{name}");
    let Some(entry_name) = zip
        .file_names()
        .find(|n| *n == name || n.ends_with(&suffix))
        .map(str::to_string)
    else {
        return Ok(None);
    };

    let mut entry = zip
        .by_name(&entry_name)
        .map_err(|e| ImportError::artifact(&key, e))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|source| ImportError::Io {
            path: PathBuf::from(&key).join(&entry_name),
            source,
        })?;
    Ok(Some(bytes))
}

pub fn read_archive_metadata(archive: &Path) -> Result<Option<ArchiveMetadata>, ImportError> {
    let Some(bytes) = read_archive_file(archive, METADATA_FILE)? else {
        return Ok(None);
    };
    let metadata = serde_json::from_slice(&bytes).map_err(|e| {
        ImportError::artifact(
            archive.display().to_string(),
            format!("invalid {METADATA_FILE}: {e}"),
        )
    })?;
    Ok(Some(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockReportSink;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn filters_on_prefix_and_suffix() {
        let settings = ImportSettings::new("bucket", ObjectTag::new("rp", "true"))
            .with_prefix("downtime-report")
            .with_suffix(".yaml");
        assert!(settings.accepts("downtime-report-1.yaml"));
        assert!(!settings.accepts("downtime-report-1.zip"));
        assert!(!settings.accepts("results/downtime-report-1.yaml"));
        assert!(ImportSettings::new("b", ObjectTag::new("rp", "true")).accepts("anything"));
    }

    #[test]
    fn reads_metadata_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.zip");
        write_zip(
            &path,
            &[
                (
                    "metadata.json",
                    r#"{"name":"osd-e2e","rhmiVersion":"1.2.0","jobURL":"https://ci/job/1"}"#,
                ),
                ("nested/junit.xml", "<testsuite/>"),
            ],
        );
        let metadata = read_archive_metadata(&path).unwrap().unwrap();
        assert_eq!(metadata.name.as_deref(), Some("osd-e2e"));
        assert_eq!(metadata.rhmi_version.as_deref(), Some("1.2.0"));
        assert_eq!(metadata.job_url.as_deref(), Some("https://ci/job/1"));
        assert_eq!(
            read_archive_file(&path, "junit.xml").unwrap().unwrap(),
            b"<testsuite/>"
        );
        assert!(read_archive_file(&path, "missing.txt").unwrap().is_none());
    }

    #[test]
    fn archive_without_metadata_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.zip");
        write_zip(&path, &[("other.txt", "x")]);
        assert!(read_archive_metadata(&path).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_job_polls_until_terminal() {
        let mut sink = MockReportSink::new();
        let mut calls = 0;
        sink.expect_status().times(3).returning(move |_| {
            calls += 1;
            Ok(if calls < 3 {
                JobStatus::Running
            } else {
                JobStatus::Succeeded
            })
        });
        wait_for_job(
            &sink,
            "42",
            Duration::from_secs(2),
            Duration::from_secs(60),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_job_times_out() {
        let mut sink = MockReportSink::new();
        sink.expect_status().returning(|_| Ok(JobStatus::Pending));
        sink.expect_name().return_const("polarion".to_string());
        let err = wait_for_job(
            &sink,
            "42",
            Duration::from_secs(2),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::Timeout { job, .. } if job == "42"));
    }

    #[tokio::test]
    async fn wait_for_job_reports_sink_failure() {
        let mut sink = MockReportSink::new();
        sink.expect_status()
            .returning(|_| Ok(JobStatus::Failed("FAILED".into())));
        sink.expect_name().return_const("polarion".to_string());
        let err = wait_for_job(
            &sink,
            "7",
            Duration::from_millis(1),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::SinkFailed { status, .. } if status == "FAILED"));
    }

    #[tokio::test]
    async fn wait_for_job_observes_cancellation() {
        let sink = MockReportSink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait_for_job(&sink, "1", Duration::ZERO, Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
    }
}
