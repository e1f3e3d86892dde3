//! [`ObjectStore`] on S3.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, Tag, Tagging};
use aws_sdk_s3::Client;
use tracing::{debug, error};

use relctl_core::contract::{ObjectStore, ObjectSummary, ObjectTag};
use relctl_core::error::RemoteError;

const SERVICE: &str = "s3";
/// Upper bound of keys in one DeleteObjects call.
const DELETE_BATCH: usize = 1000;

fn remote<E: std::error::Error>(err: E) -> RemoteError {
    RemoteError::transport(SERVICE, DisplayErrorContext(&err))
}

pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Load credentials and region from the default AWS provider chain.
    pub async fn from_env(region: Option<String>) -> Self {
        let config = crate::aws::sdk_config(region).await;
        S3Store {
            client: Client::new(&config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<String>,
    ) -> Result<Vec<ObjectSummary>, RemoteError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.clone())
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| {
                    error!(bucket, error = %DisplayErrorContext(&e), "[S3] Failed to list objects");
                    remote(e)
                })?;
            objects.extend(page.contents().iter().filter_map(|o| {
                o.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: o.size(),
                })
            }));
            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        debug!(bucket, count = objects.len(), "[S3] Listed objects");
        Ok(objects)
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> Result<Vec<ObjectTag>, RemoteError> {
        let out = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(remote)?;
        Ok(out
            .tag_set()
            .iter()
            .map(|t| ObjectTag::new(t.key(), t.value()))
            .collect())
    }

    async fn put_tags(
        &self,
        bucket: &str,
        key: &str,
        tags: Vec<ObjectTag>,
    ) -> Result<(), RemoteError> {
        let tag_set = tags
            .into_iter()
            .map(|t| Tag::builder().key(t.key).value(t.value).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(remote)?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(remote)?;
        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(remote)?;
        debug!(bucket, key, "[S3] Object tags replaced");
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), RemoteError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(remote)?;
        let bytes = out
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::transport(SERVICE, e))?
            .into_bytes();
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| RemoteError::transport(SERVICE, format!("{}: {e}", dest.display())))?;
        debug!(bucket, key, bytes = bytes.len(), "[S3] Object downloaded");
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, source: &str, dest: &str) -> Result<(), RemoteError> {
        self.client
            .copy_object()
            .bucket(bucket)
            .key(dest)
            .copy_source(format!("{bucket}/{}", urlencoding::encode(source)))
            .send()
            .await
            .map_err(|e| {
                error!(bucket, source, dest, error = %DisplayErrorContext(&e), "[S3] Failed to copy object");
                remote(e)
            })?;
        debug!(bucket, source, dest, "[S3] Object copied");
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<(), RemoteError> {
        for chunk in keys.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(remote)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(remote)?;
            let out = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(remote)?;
            if let Some(failed) = out.errors().first() {
                error!(bucket, failures = out.errors().len(), "[S3] Some objects were not deleted");
                return Err(RemoteError::transport(
                    SERVICE,
                    format!(
                        "failed to delete {}: {}",
                        failed.key().unwrap_or_default(),
                        failed.message().unwrap_or_default()
                    ),
                ));
            }
        }
        debug!(bucket, count = keys.len(), "[S3] Objects deleted");
        Ok(())
    }
}
