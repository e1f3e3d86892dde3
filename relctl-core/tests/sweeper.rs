use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relctl_core::contract::{
    DeleteOutcome, MockResourceClass, Resource, ResourceClass, ResourceKind, TagFilter,
};
use relctl_core::error::RemoteError;
use relctl_core::sweep::{ItemStatus, Report, Sweeper};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbState {
    Present,
    Deleting,
    Gone,
}

/// A database whose deletion finishes asynchronously, and a security group
/// that cannot go while the database exists.
#[derive(Debug)]
struct Cloud {
    db: DbState,
    security_group: bool,
}

struct Databases(Arc<Mutex<Cloud>>);
struct SecurityGroups(Arc<Mutex<Cloud>>);

#[async_trait]
impl ResourceClass for Databases {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RdsInstance
    }

    async fn list(&self, _filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let mut cloud = self.0.lock().unwrap();
        if cloud.db == DbState::Deleting {
            cloud.db = DbState::Gone;
        }
        Ok(match cloud.db {
            DbState::Gone => vec![],
            _ => vec![Resource {
                id: "db-1".to_string(),
                name: "cluster-db".to_string(),
                kind: ResourceKind::RdsInstance,
            }],
        })
    }

    async fn delete(&self, _resource: &Resource) -> Result<DeleteOutcome, RemoteError> {
        let mut cloud = self.0.lock().unwrap();
        cloud.db = DbState::Deleting;
        Ok(DeleteOutcome::InProgress)
    }
}

#[async_trait]
impl ResourceClass for SecurityGroups {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SecurityGroup
    }

    async fn list(&self, _filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let cloud = self.0.lock().unwrap();
        Ok(if cloud.security_group {
            vec![Resource {
                id: "sg-1".to_string(),
                name: "cluster-sg".to_string(),
                kind: ResourceKind::SecurityGroup,
            }]
        } else {
            vec![]
        })
    }

    async fn delete(&self, _resource: &Resource) -> Result<DeleteOutcome, RemoteError> {
        let mut cloud = self.0.lock().unwrap();
        if cloud.db != DbState::Gone {
            return Ok(DeleteOutcome::DependencyViolation(
                "resource sg-1 has a dependent object".to_string(),
            ));
        }
        cloud.security_group = false;
        Ok(DeleteOutcome::Deleted)
    }
}

fn status_of(report: &Report, id: &str) -> Option<ItemStatus> {
    report.items.iter().find(|i| i.id == id).map(|i| i.status)
}

#[tokio::test]
async fn test_dependency_violation_is_skipped_then_completes() {
    let cloud = Arc::new(Mutex::new(Cloud {
        db: DbState::Present,
        security_group: true,
    }));
    let sweeper = Sweeper::new(
        vec![
            Arc::new(SecurityGroups(Arc::clone(&cloud))),
            Arc::new(Databases(Arc::clone(&cloud))),
        ],
        4,
    );
    let filter = TagFilter::new("cluster-abc");
    let cancel = CancellationToken::new();

    let first = sweeper.sweep_once(&filter, false, &cancel).await.unwrap();
    assert_eq!(status_of(&first, "db-1"), Some(ItemStatus::InProgress));
    assert_eq!(status_of(&first, "sg-1"), Some(ItemStatus::Skipped));
    assert!(!first.all_items_complete());

    let second = sweeper.sweep_once(&filter, false, &cancel).await.unwrap();
    assert_eq!(status_of(&second, "db-1"), None);
    assert_eq!(status_of(&second, "sg-1"), Some(ItemStatus::Complete));
    assert!(second.all_items_complete());
}

#[tokio::test]
async fn test_poll_loop_runs_until_quiet() {
    let cloud = Arc::new(Mutex::new(Cloud {
        db: DbState::Present,
        security_group: true,
    }));
    let sweeper = Sweeper::new(
        vec![
            Arc::new(Databases(Arc::clone(&cloud))),
            Arc::new(SecurityGroups(Arc::clone(&cloud))),
        ],
        2,
    );

    let mut reports = Vec::new();
    let last = sweeper
        .sweep_until_complete(
            &TagFilter::new("cluster-abc"),
            false,
            Duration::from_millis(1),
            Duration::from_secs(5),
            &CancellationToken::new(),
            |r| reports.push(r.clone()),
        )
        .await
        .unwrap();
    assert!(last.all_items_complete());
    assert_eq!(reports.len(), 2);
    assert_eq!(status_of(&reports[0], "sg-1"), Some(ItemStatus::Skipped));
}

#[tokio::test]
async fn test_dry_run_makes_no_mutations() {
    let mut buckets = MockResourceClass::new();
    buckets.expect_kind().return_const(ResourceKind::Bucket);
    buckets
        .expect_list()
        .withf(|f| f.pairs().contains(&("owner".to_string(), "qe".to_string())))
        .returning(|_| {
            Ok(vec![
                Resource {
                    id: "cluster-abc-logs".to_string(),
                    name: "cluster-abc-logs".to_string(),
                    kind: ResourceKind::Bucket,
                },
                Resource {
                    id: "cluster-abc-backups".to_string(),
                    name: "cluster-abc-backups".to_string(),
                    kind: ResourceKind::Bucket,
                },
            ])
        });
    buckets.expect_delete().never();

    let mut vpcs = MockResourceClass::new();
    vpcs.expect_kind().return_const(ResourceKind::Vpc);
    vpcs.expect_list().returning(|_| {
        Ok(vec![Resource {
            id: "vpc-1".to_string(),
            name: "cluster-abc-vpc".to_string(),
            kind: ResourceKind::Vpc,
        }])
    });
    vpcs.expect_delete().never();

    let sweeper = Sweeper::new(vec![Arc::new(vpcs), Arc::new(buckets)], 4);
    let report = sweeper
        .sweep_once(
            &TagFilter::new("cluster-abc").with_tag("owner", "qe"),
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.items.len(), 3);
    assert!(report.items.iter().all(|i| i.status == ItemStatus::DryRun));
    assert!(report.all_items_complete());
    assert_eq!(report.items[2].kind, ResourceKind::Vpc);
}

#[tokio::test]
async fn test_cancelled_sweep_stops() {
    let mut vpcs = MockResourceClass::new();
    vpcs.expect_kind().return_const(ResourceKind::Vpc);
    vpcs.expect_list().never();
    let sweeper = Sweeper::new(vec![Arc::new(vpcs)], 1);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = sweeper
        .sweep_once(&TagFilter::new("x"), false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, relctl_core::error::SweepError::Cancelled));
}
