//! ReportPortal launch import.
//!
//! Test-result zips are uploaded with the launch import endpoint. The import
//! response only carries the launch UUID inside a human-readable message, so
//! the UUID is parsed out of it and resolved to the numeric launch id, which
//! is then used to attach the job URL and version.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use relctl_core::contract::{
    ArtifactTransformer, JobStatus, ObjectTag, Prepared, ReportSink, Submission,
};
use relctl_core::error::{ImportError, RemoteError};
use relctl_core::import::{read_archive_metadata, METADATA_FILE};

use crate::http;

const SERVICE: &str = "reportportal";
pub const DEFAULT_REPORTPORTAL_URL: &str =
    "https://reportportal-cloud-services.cloud.paas.psi.redhat.com";
pub const DEFAULT_PROJECT: &str = "rhmi";

pub fn processed_tag() -> ObjectTag {
    ObjectTag::new("rp", "true")
}

#[derive(Debug, Deserialize)]
struct ImportResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Launch {
    id: u64,
    #[serde(default)]
    status: Option<String>,
}

pub struct ReportPortalSink {
    http: Client,
    base_url: String,
    project: String,
    token: String,
    uuid_pattern: Regex,
}

impl ReportPortalSink {
    pub fn new(
        base_url: impl Into<String>,
        project: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let uuid_pattern = Regex::new(r"=\s?'?([a-zA-Z0-9-]+)'?")
            .map_err(|e| RemoteError::decode(SERVICE, e))?;
        Ok(ReportPortalSink {
            http: http::client()?,
            base_url: base_url.into(),
            project: project.into(),
            token: token.into(),
            uuid_pattern,
        })
    }

    fn url(&self, path: &str) -> String {
        http::join(
            &self.base_url,
            &format!("api/v1/{}/{}", self.project, path),
        )
    }

    fn launch_uuid(&self, message: &str) -> Result<String, RemoteError> {
        self.uuid_pattern
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                RemoteError::decode(SERVICE, format!("no launch id in message {message:?}"))
            })
    }

    async fn import(&self, submission: &Submission) -> Result<String, ImportError> {
        let bytes = tokio::fs::read(&submission.payload)
            .await
            .map_err(|source| ImportError::Io {
                path: submission.payload.clone(),
                source,
            })?;
        let part = Part::bytes(bytes)
            .file_name(format!("{}.zip", submission.name))
            .mime_str("application/zip")
            .map_err(|e| RemoteError::transport(SERVICE, e))?;
        let form = Form::new()
            .part("file", part)
            .text("projectName", self.project.clone());
        let sent = self
            .http
            .post(self.url("launch/import"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await;
        let response: ImportResponse = http::json(SERVICE, sent).await?;
        debug!(message = %response.message, "[REPORTPORTAL] Launch imported");
        Ok(self.launch_uuid(&response.message)?)
    }
}

#[async_trait]
impl ReportSink for ReportPortalSink {
    fn name(&self) -> String {
        SERVICE.to_string()
    }

    async fn submit(&self, submission: &Submission) -> Result<String, ImportError> {
        let uuid = self.import(submission).await?;

        let sent = self
            .http
            .get(self.url(&format!("launch/uuid/{uuid}")))
            .bearer_auth(&self.token)
            .send()
            .await;
        let launch: Launch = http::json(SERVICE, sent).await?;

        let mut attributes = vec![json!({ "value": submission.name })];
        if let Some(version) = &submission.version {
            attributes.push(json!({ "key": "version", "value": version }));
        }
        let body = json!({
            "description": submission.job_url.clone().unwrap_or_default(),
            "attributes": attributes,
        });
        let sent = self
            .http
            .put(self.url(&format!("launch/{}/update", launch.id)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await;
        http::checked(SERVICE, sent).await?;
        info!(launch = launch.id, uuid = %uuid, "[REPORTPORTAL] Launch updated");
        Ok(launch.id.to_string())
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, ImportError> {
        let sent = self
            .http
            .get(self.url(&format!("launch/{job_id}")))
            .bearer_auth(&self.token)
            .send()
            .await;
        let launch: Launch = http::json(SERVICE, sent).await?;
        Ok(match launch.status.as_deref() {
            Some("IN_PROGRESS") => JobStatus::Running,
            _ => JobStatus::Succeeded,
        })
    }
}

/// Uploads the zip as is; the launch name comes from its `metadata.json`.
pub struct LaunchArchive;

impl ArtifactTransformer for LaunchArchive {
    fn prepare(
        &self,
        key: &str,
        artifact: &Path,
        content_sha256: &str,
        _workdir: &Path,
    ) -> Result<Prepared, ImportError> {
        let Some(metadata) = read_archive_metadata(artifact)? else {
            return Ok(Prepared::Skip(format!("archive has no {METADATA_FILE}")));
        };
        let Some(name) = metadata.name.filter(|n| !n.is_empty()) else {
            return Ok(Prepared::Skip(format!("{METADATA_FILE} has no name")));
        };
        Ok(Prepared::Submit(Submission {
            key: key.to_string(),
            name,
            version: metadata.rhmi_version.filter(|v| !v.is_empty()),
            job_url: metadata.job_url,
            payload: artifact.to_path_buf(),
            content_sha256: content_sha256.to_string(),
        }))
    }
}
