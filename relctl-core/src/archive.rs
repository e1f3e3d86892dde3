//! Moving processed report objects into the `archive/` folder of their bucket.
//!
//! A rule names a bucket and the tags an object must carry before it counts
//! as processed (the importers' commit markers). Matching top-level objects
//! are copied under [`ARCHIVE_PREFIX`] and the originals deleted. Only objects
//! whose copy succeeded are deleted, so a failed run never loses data.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::contract::{ObjectStore, ObjectTag};
use crate::error::{ArchiveError, RemoteError};
use crate::runner;

pub const ARCHIVE_PREFIX: &str = "archive/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveRule {
    pub bucket: String,
    /// Every tag must be present on an object; an empty list matches all.
    #[serde(default)]
    pub tags: Vec<ObjectTag>,
}

/// The YAML file passed to `report cleanup`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub configs: Vec<ArchiveRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketReport {
    pub bucket: String,
    pub moved: Vec<String>,
    /// Objects lacking one of the required tags.
    pub kept: Vec<String>,
    /// Objects whose tag lookup or copy failed; left in place.
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct Archiver {
    store: Arc<dyn ObjectStore>,
}

impl Archiver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Archiver { store }
    }

    /// Archive every bucket of `config`, one worker per bucket.
    pub async fn run(
        &self,
        config: ArchiveConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<BucketReport>, ArchiveError> {
        let workers = config.configs.len();
        let tasks: Vec<_> = config
            .configs
            .into_iter()
            .map(|rule| {
                let archiver = self.clone();
                move || async move {
                    let span = tracing::info_span!("archive_bucket", bucket = %rule.bucket);
                    archiver.archive_bucket(rule).instrument(span).await
                }
            })
            .collect();
        let reports = runner::run(tasks, workers, cancel).await?;
        info!(buckets = reports.len(), "[ARCHIVE] All buckets processed");
        Ok(reports)
    }

    async fn archive_bucket(&self, rule: ArchiveRule) -> Result<BucketReport, ArchiveError> {
        let bucket = rule.bucket.as_str();
        let remote = |source: RemoteError| ArchiveError::Remote {
            bucket: bucket.to_string(),
            source,
        };
        let objects = self.store.list_objects(bucket, None).await.map_err(remote)?;
        let mut report = BucketReport {
            bucket: bucket.to_string(),
            ..BucketReport::default()
        };

        let mut copied = Vec::new();
        for object in objects.into_iter().filter(|o| !o.key.contains('/')) {
            let key = object.key;
            let tags = match self.store.get_tags(bucket, &key).await {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(key = %key, error = %e, "[ARCHIVE] Tag lookup failed, skipping object");
                    report.failed.push(key);
                    continue;
                }
            };
            if !rule.tags.iter().all(|t| tags.contains(t)) {
                debug!(key = %key, "[ARCHIVE] Required tags missing, keeping object");
                report.kept.push(key);
                continue;
            }
            let dest = format!("{ARCHIVE_PREFIX}{key}");
            match self.store.copy_object(bucket, &key, &dest).await {
                Ok(()) => {
                    debug!(key = %key, dest = %dest, "[ARCHIVE] Object copied");
                    copied.push(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "[ARCHIVE] Copy failed, object stays in place");
                    report.failed.push(key);
                }
            }
        }

        if !copied.is_empty() {
            self.store
                .delete_objects(bucket, copied.clone())
                .await
                .map_err(remote)?;
        }
        info!(
            moved = copied.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            "[ARCHIVE] Bucket archived"
        );
        report.moved = copied;
        Ok(report)
    }
}
