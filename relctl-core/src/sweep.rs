//! Cluster resource sweeper.
//!
//! Deletes every cloud resource tagged with a cluster id, one resource class
//! at a time in deletion order. Deletions inside one class run through the
//! task runner. A single pass never retries; callers loop with
//! [`Sweeper::sweep_until_complete`] until the report is quiet.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contract::{DeleteOutcome, Resource, ResourceClass, ResourceKind, TagFilter};
use crate::error::SweepError;
use crate::runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Complete,
    InProgress,
    Skipped,
    DryRun,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemStatus::Complete => "complete",
            ItemStatus::InProgress => "in progress",
            ItemStatus::Skipped => "skipped",
            ItemStatus::DryRun => "dry-run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportItem {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub action: &'static str,
    pub status: ItemStatus,
    /// Why a deletion was skipped, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub items: Vec<ReportItem>,
}

impl Report {
    /// True when every item is complete or was only reported under dry-run.
    pub fn all_items_complete(&self) -> bool {
        self.items
            .iter()
            .all(|i| matches!(i.status, ItemStatus::Complete | ItemStatus::DryRun))
    }

    pub fn pending(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::InProgress | ItemStatus::Skipped))
            .count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}",
                item.kind, item.id, item.name, item.action, item.status
            )?;
        }
        Ok(())
    }
}

pub struct Sweeper {
    classes: Vec<Arc<dyn ResourceClass>>,
    workers: usize,
}

impl Sweeper {
    pub fn new(mut classes: Vec<Arc<dyn ResourceClass>>, workers: usize) -> Self {
        classes.sort_by_key(|c| c.kind());
        Sweeper { classes, workers }
    }

    /// One pass over every class.
    pub async fn sweep_once(
        &self,
        filter: &TagFilter,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<Report, SweepError> {
        let mut report = Report::default();
        for class in &self.classes {
            if cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            let kind = class.kind();
            let resources = class.list(filter).await?;
            debug!(kind = %kind, count = resources.len(), "[SWEEP] Listed resources");
            if resources.is_empty() {
                continue;
            }

            if dry_run {
                for resource in resources {
                    info!(kind = %kind, id = %resource.id, "[SWEEP] Would delete (dry-run)");
                    report.items.push(item(resource, ItemStatus::DryRun, None));
                }
                continue;
            }

            let tasks: Vec<_> = resources
                .into_iter()
                .map(|resource| {
                    let class = Arc::clone(class);
                    move || async move {
                        let outcome = class.delete(&resource).await?;
                        Ok::<_, SweepError>(classify(resource, outcome))
                    }
                })
                .collect();
            let items = runner::run(tasks, self.workers, cancel).await?;
            report.items.extend(items);
        }
        info!(
            items = report.items.len(),
            pending = report.pending(),
            "[SWEEP] Pass finished"
        );
        Ok(report)
    }

    /// Repeat [`Sweeper::sweep_once`] every `interval` until every item is
    /// complete. Cancellation is observed when the loop wakes up.
    pub async fn sweep_until_complete<F>(
        &self,
        filter: &TagFilter,
        dry_run: bool,
        interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
        mut on_pass: F,
    ) -> Result<Report, SweepError>
    where
        F: FnMut(&Report),
    {
        let started = Instant::now();
        loop {
            let report = self.sweep_once(filter, dry_run, cancel).await?;
            on_pass(&report);
            if report.all_items_complete() {
                return Ok(report);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                warn!(cluster_id = %filter.cluster_id, pending = report.pending(), "[SWEEP] Gave up waiting");
                return Err(SweepError::Timeout {
                    cluster_id: filter.cluster_id.clone(),
                    waited,
                });
            }
            tokio::time::sleep(interval).await;
            if cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
        }
    }
}

fn item(resource: Resource, status: ItemStatus, reason: Option<String>) -> ReportItem {
    ReportItem {
        id: resource.id,
        name: resource.name,
        kind: resource.kind,
        action: "delete",
        status,
        reason,
    }
}

fn classify(resource: Resource, outcome: DeleteOutcome) -> ReportItem {
    match outcome {
        DeleteOutcome::Deleted => {
            info!(kind = %resource.kind, id = %resource.id, "[SWEEP] Deleted");
            item(resource, ItemStatus::Complete, None)
        }
        DeleteOutcome::NotFound => {
            debug!(kind = %resource.kind, id = %resource.id, "[SWEEP] Already gone");
            item(resource, ItemStatus::Complete, None)
        }
        DeleteOutcome::InProgress => {
            info!(kind = %resource.kind, id = %resource.id, "[SWEEP] Deletion in progress");
            item(resource, ItemStatus::InProgress, None)
        }
        DeleteOutcome::DependencyViolation(reason) => {
            warn!(kind = %resource.kind, id = %resource.id, reason = %reason, "[SWEEP] Still referenced, skipping");
            item(resource, ItemStatus::Skipped, Some(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockResourceClass;

    fn resource(id: &str, kind: ResourceKind) -> Resource {
        Resource {
            id: id.to_string(),
            name: format!("{id}-name"),
            kind,
        }
    }

    #[test]
    fn all_items_complete_accepts_dry_run() {
        let report = Report {
            items: vec![
                item(resource("a", ResourceKind::Vpc), ItemStatus::Complete, None),
                item(resource("b", ResourceKind::Subnet), ItemStatus::DryRun, None),
            ],
        };
        assert!(report.all_items_complete());
        assert!(Report::default().all_items_complete());

        let report = Report {
            items: vec![item(
                resource("c", ResourceKind::RdsInstance),
                ItemStatus::InProgress,
                None,
            )],
        };
        assert!(!report.all_items_complete());
    }

    #[tokio::test]
    async fn classes_run_in_deletion_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut vpc = MockResourceClass::new();
        vpc.expect_kind().return_const(ResourceKind::Vpc);
        let seen = Arc::clone(&order);
        vpc.expect_list().returning(move |_| {
            seen.lock().unwrap().push(ResourceKind::Vpc);
            Ok(vec![])
        });

        let mut rds = MockResourceClass::new();
        rds.expect_kind().return_const(ResourceKind::RdsInstance);
        let seen = Arc::clone(&order);
        rds.expect_list().returning(move |_| {
            seen.lock().unwrap().push(ResourceKind::RdsInstance);
            Ok(vec![resource("db-1", ResourceKind::RdsInstance)])
        });
        rds.expect_delete()
            .returning(|_| Ok(DeleteOutcome::InProgress));

        let sweeper = Sweeper::new(vec![Arc::new(vpc), Arc::new(rds)], 4);
        let report = sweeper
            .sweep_once(&TagFilter::new("abc"), false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec![ResourceKind::RdsInstance, ResourceKind::Vpc]
        );
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].status, ItemStatus::InProgress);
        assert!(!report.all_items_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_times_out_while_resources_remain() {
        let mut rds = MockResourceClass::new();
        rds.expect_kind().return_const(ResourceKind::RdsInstance);
        rds.expect_list()
            .returning(|_| Ok(vec![resource("db-1", ResourceKind::RdsInstance)]));
        rds.expect_delete()
            .returning(|_| Ok(DeleteOutcome::InProgress));

        let sweeper = Sweeper::new(vec![Arc::new(rds)], 1);
        let mut passes = 0;
        let err = sweeper
            .sweep_until_complete(
                &TagFilter::new("abc"),
                false,
                Duration::from_secs(10),
                Duration::from_secs(25),
                &CancellationToken::new(),
                |_| passes += 1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Timeout { cluster_id, .. } if cluster_id == "abc"));
        assert_eq!(passes, 4);
    }
}
