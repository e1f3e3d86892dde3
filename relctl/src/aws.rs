//! AWS resource classes swept by `pipeline cleanup-aws`.
//!
//! Each class lists the resources carrying every tag of the [`TagFilter`] and
//! deletes one resource per call. AWS error codes are folded into
//! [`DeleteOutcome`]: missing resources count as gone, dependency errors are
//! skipped until the next pass, and databases that are already shutting down
//! report as in progress.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::types::{Filter, VpcPeeringConnectionStateReasonCode};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::{debug, info};

use relctl_core::contract::{DeleteOutcome, Resource, ResourceClass, ResourceKind, TagFilter};
use relctl_core::error::RemoteError;

/// Shared SDK configuration from the default provider chain.
pub async fn sdk_config(region: Option<String>) -> SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region));
    }
    let config = loader.load().await;
    info!(region = ?config.region(), "[AWS] SDK configured");
    config
}

/// Every class, for one account and region.
pub fn resource_classes(config: &SdkConfig) -> Vec<Arc<dyn ResourceClass>> {
    let ec2 = aws_sdk_ec2::Client::new(config);
    vec![
        Arc::new(RdsInstances(aws_sdk_rds::Client::new(config))),
        Arc::new(CacheClusters(aws_sdk_elasticache::Client::new(config))),
        Arc::new(Snapshots(ec2.clone())),
        Arc::new(Buckets(aws_sdk_s3::Client::new(config))),
        Arc::new(VpcPeerings(ec2.clone())),
        Arc::new(SecurityGroups(ec2.clone())),
        Arc::new(RouteTables(ec2.clone())),
        Arc::new(Subnets(ec2.clone())),
        Arc::new(Vpcs(ec2)),
    ]
}

fn remote<E: std::error::Error>(service: &'static str) -> impl Fn(E) -> RemoteError {
    move |err| RemoteError::transport(service, DisplayErrorContext(&err))
}

/// Map a failed delete call onto an outcome, or a [`RemoteError`] if the
/// failure is not one the sweep knows how to wait out.
fn delete_outcome<E>(service: &'static str, err: E) -> Result<DeleteOutcome, RemoteError>
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let code = err.code().unwrap_or_default();
    if code.contains("NotFound") || code == "NoSuchBucket" {
        return Ok(DeleteOutcome::NotFound);
    }
    if code == "DependencyViolation" || code.ends_with(".InUse") || code == "BucketNotEmpty" {
        let reason = err.message().unwrap_or(code).to_string();
        return Ok(DeleteOutcome::DependencyViolation(reason));
    }
    if code == "InvalidDBInstanceState" || code == "InvalidReplicationGroupState" {
        return Ok(DeleteOutcome::InProgress);
    }
    Err(remote(service)(err))
}

fn ec2_filters(filter: &TagFilter) -> Vec<Filter> {
    filter
        .pairs()
        .into_iter()
        .map(|(key, value)| {
            Filter::builder()
                .name(format!("tag:{key}"))
                .values(value)
                .build()
        })
        .collect()
}

fn ec2_name(tags: &[aws_sdk_ec2::types::Tag], fallback: &str) -> String {
    tags.iter()
        .find(|t| t.key() == Some("Name"))
        .and_then(|t| t.value())
        .unwrap_or(fallback)
        .to_string()
}

fn resource(id: &str, name: String, kind: ResourceKind) -> Resource {
    Resource {
        id: id.to_string(),
        name,
        kind,
    }
}

pub struct Vpcs(aws_sdk_ec2::Client);

#[async_trait]
impl ResourceClass for Vpcs {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vpc
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_vpcs()
            .set_filters(Some(ec2_filters(filter)))
            .send()
            .await
            .map_err(remote("ec2"))?;
        Ok(out
            .vpcs()
            .iter()
            .filter_map(|v| {
                let id = v.vpc_id()?;
                Some(resource(id, ec2_name(v.tags(), id), self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self.0.delete_vpc().vpc_id(&r.id).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("ec2", e),
        }
    }
}

pub struct Subnets(aws_sdk_ec2::Client);

#[async_trait]
impl ResourceClass for Subnets {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Subnet
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_subnets()
            .set_filters(Some(ec2_filters(filter)))
            .send()
            .await
            .map_err(remote("ec2"))?;
        Ok(out
            .subnets()
            .iter()
            .filter_map(|s| {
                let id = s.subnet_id()?;
                Some(resource(id, ec2_name(s.tags(), id), self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self.0.delete_subnet().subnet_id(&r.id).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("ec2", e),
        }
    }
}

pub struct SecurityGroups(aws_sdk_ec2::Client);

#[async_trait]
impl ResourceClass for SecurityGroups {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SecurityGroup
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_security_groups()
            .set_filters(Some(ec2_filters(filter)))
            .send()
            .await
            .map_err(remote("ec2"))?;
        Ok(out
            .security_groups()
            .iter()
            // The default group goes with its VPC.
            .filter(|g| g.group_name() != Some("default"))
            .filter_map(|g| {
                let id = g.group_id()?;
                let name = g.group_name().unwrap_or(id).to_string();
                Some(resource(id, name, self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self.0.delete_security_group().group_id(&r.id).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("ec2", e),
        }
    }
}

pub struct RouteTables(aws_sdk_ec2::Client);

#[async_trait]
impl ResourceClass for RouteTables {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RouteTable
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_route_tables()
            .set_filters(Some(ec2_filters(filter)))
            .send()
            .await
            .map_err(remote("ec2"))?;
        Ok(out
            .route_tables()
            .iter()
            .filter(|t| !t.associations().iter().any(|a| a.main() == Some(true)))
            .filter_map(|t| {
                let id = t.route_table_id()?;
                Some(resource(id, ec2_name(t.tags(), id), self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        let described = match self
            .0
            .describe_route_tables()
            .route_table_ids(&r.id)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) => return delete_outcome("ec2", e),
        };
        let associations: Vec<String> = described
            .route_tables()
            .iter()
            .flat_map(|t| t.associations())
            .filter(|a| a.main() != Some(true))
            .filter_map(|a| a.route_table_association_id().map(str::to_string))
            .collect();
        for association in associations {
            debug!(route_table = %r.id, association = %association, "[AWS] Disassociating route table");
            if let Err(e) = self
                .0
                .disassociate_route_table()
                .association_id(&association)
                .send()
                .await
            {
                return delete_outcome("ec2", e);
            }
        }
        match self.0.delete_route_table().route_table_id(&r.id).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("ec2", e),
        }
    }
}

pub struct VpcPeerings(aws_sdk_ec2::Client);

#[async_trait]
impl ResourceClass for VpcPeerings {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VpcPeering
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_vpc_peering_connections()
            .set_filters(Some(ec2_filters(filter)))
            .send()
            .await
            .map_err(remote("ec2"))?;
        Ok(out
            .vpc_peering_connections()
            .iter()
            .filter(|p| {
                !matches!(
                    p.status().and_then(|s| s.code()),
                    Some(
                        VpcPeeringConnectionStateReasonCode::Deleted
                            | VpcPeeringConnectionStateReasonCode::Deleting
                    )
                )
            })
            .filter_map(|p| {
                let id = p.vpc_peering_connection_id()?;
                Some(resource(id, ec2_name(p.tags(), id), self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self
            .0
            .delete_vpc_peering_connection()
            .vpc_peering_connection_id(&r.id)
            .send()
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("ec2", e),
        }
    }
}

pub struct Snapshots(aws_sdk_ec2::Client);

#[async_trait]
impl ResourceClass for Snapshots {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Snapshot
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_snapshots()
            .owner_ids("self")
            .set_filters(Some(ec2_filters(filter)))
            .send()
            .await
            .map_err(remote("ec2"))?;
        Ok(out
            .snapshots()
            .iter()
            .filter_map(|s| {
                let id = s.snapshot_id()?;
                Some(resource(id, ec2_name(s.tags(), id), self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self.0.delete_snapshot().snapshot_id(&r.id).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("ec2", e),
        }
    }
}

pub struct RdsInstances(aws_sdk_rds::Client);

#[async_trait]
impl ResourceClass for RdsInstances {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RdsInstance
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_db_instances()
            .send()
            .await
            .map_err(remote("rds"))?;
        Ok(out
            .db_instances()
            .iter()
            .filter(|db| {
                let tags: Vec<(&str, &str)> = db
                    .tag_list()
                    .iter()
                    .filter_map(|t| Some((t.key()?, t.value()?)))
                    .collect();
                filter.matches(tags.iter().copied())
            })
            .filter_map(|db| {
                let id = db.db_instance_identifier()?;
                Some(resource(id, id.to_string(), self.kind()))
            })
            .collect())
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self
            .0
            .delete_db_instance()
            .db_instance_identifier(&r.id)
            .skip_final_snapshot(true)
            .delete_automated_backups(true)
            .send()
            .await
        {
            Ok(_) => Ok(DeleteOutcome::InProgress),
            Err(e) => delete_outcome("rds", e),
        }
    }
}

pub struct CacheClusters(aws_sdk_elasticache::Client);

#[async_trait]
impl ResourceClass for CacheClusters {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CacheCluster
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self
            .0
            .describe_replication_groups()
            .send()
            .await
            .map_err(remote("elasticache"))?;
        let mut found = Vec::new();
        for group in out.replication_groups() {
            let (Some(id), Some(arn)) = (group.replication_group_id(), group.arn()) else {
                continue;
            };
            let tags = self
                .0
                .list_tags_for_resource()
                .resource_name(arn)
                .send()
                .await
                .map_err(remote("elasticache"))?;
            let pairs: Vec<(&str, &str)> = tags
                .tag_list()
                .iter()
                .filter_map(|t| Some((t.key()?, t.value()?)))
                .collect();
            if filter.matches(pairs.iter().copied()) {
                found.push(resource(id, id.to_string(), self.kind()));
            }
        }
        Ok(found)
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        match self
            .0
            .delete_replication_group()
            .replication_group_id(&r.id)
            .send()
            .await
        {
            Ok(_) => Ok(DeleteOutcome::InProgress),
            Err(e) => delete_outcome("elasticache", e),
        }
    }
}

pub struct Buckets(aws_sdk_s3::Client);

impl Buckets {
    /// Delete every object so the bucket itself can go.
    async fn empty(&self, bucket: &str) -> Result<(), RemoteError> {
        loop {
            let page = self
                .0
                .list_objects_v2()
                .bucket(bucket)
                .send()
                .await
                .map_err(remote("s3"))?;
            let ids = page
                .contents()
                .iter()
                .filter_map(|o| o.key())
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(remote("s3"))?;
            if ids.is_empty() {
                return Ok(());
            }
            debug!(bucket, objects = ids.len(), "[AWS] Emptying bucket");
            let delete = Delete::builder()
                .set_objects(Some(ids))
                .quiet(true)
                .build()
                .map_err(remote("s3"))?;
            self.0
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(remote("s3"))?;
        }
    }
}

#[async_trait]
impl ResourceClass for Buckets {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Bucket
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<Resource>, RemoteError> {
        let out = self.0.list_buckets().send().await.map_err(remote("s3"))?;
        let mut found = Vec::new();
        for name in out.buckets().iter().filter_map(|b| b.name()) {
            // Untagged buckets and buckets in other regions fail here.
            let tagging = match self.0.get_bucket_tagging().bucket(name).send().await {
                Ok(tagging) => tagging,
                Err(e) => {
                    debug!(bucket = name, code = ?e.code(), "[AWS] Skipping bucket without readable tags");
                    continue;
                }
            };
            let pairs: Vec<(&str, &str)> =
                tagging.tag_set().iter().map(|t| (t.key(), t.value())).collect();
            if filter.matches(pairs.iter().copied()) {
                found.push(resource(name, name.to_string(), self.kind()));
            }
        }
        Ok(found)
    }

    async fn delete(&self, r: &Resource) -> Result<DeleteOutcome, RemoteError> {
        self.empty(&r.id).await?;
        match self.0.delete_bucket().bucket(&r.id).send().await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => delete_outcome("s3", e),
        }
    }
}
