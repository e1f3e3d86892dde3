//! Polarion xunit import.

use std::path::Path;

use async_trait::async_trait;
use regex::{Captures, Regex};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use relctl_core::contract::{
    ArtifactTransformer, JobStatus, ObjectTag, Prepared, ReportSink, Submission,
};
use relctl_core::error::{ImportError, RemoteError};
use relctl_core::import::{read_archive_file, read_archive_metadata, METADATA_FILE};
use relctl_core::version::{OlmType, Version};

use crate::http;

const SERVICE: &str = "polarion";
pub const PRODUCTION_URL: &str = "https://polarion.engineering.redhat.com/polarion";
pub const STAGE_URL: &str = "https://polarion.stage.engineering.redhat.com/polarion";
pub const PROJECT_ID: &str = "RedHatManagedIntegration";
pub const JUNIT_FILE: &str = "integreatly-operator-test/results/junit-integreatly-operator.xml";
const XUNIT_FILE: &str = "file.xml";

pub fn processed_tag() -> ObjectTag {
    ObjectTag::new("polarion", "true")
}

#[derive(Debug, Deserialize)]
struct ImportedFile {
    #[serde(rename = "job-ids")]
    job_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct ImportResponse {
    files: std::collections::HashMap<String, ImportedFile>,
}

#[derive(Debug, Deserialize)]
struct QueuedJob {
    status: String,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    jobs: Vec<QueuedJob>,
}

pub struct PolarionSink {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl PolarionSink {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        Ok(PolarionSink {
            http: http::client()?,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl ReportSink for PolarionSink {
    fn name(&self) -> String {
        SERVICE.to_string()
    }

    async fn submit(&self, submission: &Submission) -> Result<String, ImportError> {
        let bytes = tokio::fs::read(&submission.payload)
            .await
            .map_err(|source| ImportError::Io {
                path: submission.payload.clone(),
                source,
            })?;
        let part = Part::bytes(bytes)
            .file_name(XUNIT_FILE)
            .mime_str("application/xml")
            .map_err(|e| RemoteError::transport(SERVICE, e))?;
        let sent = self
            .http
            .post(http::join(&self.base_url, "import/xunit"))
            .basic_auth(&self.username, Some(&self.password))
            .multipart(Form::new().part("file", part))
            .send()
            .await;
        let response: ImportResponse = http::json(SERVICE, sent).await?;
        let job = response
            .files
            .get(XUNIT_FILE)
            .and_then(|f| f.job_ids.first())
            .ok_or_else(|| RemoteError::decode(SERVICE, "import response carries no job id"))?;
        info!(job, name = %submission.name, "[POLARION] Xunit queued");
        Ok(job.to_string())
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, ImportError> {
        let sent = self
            .http
            .get(http::join(&self.base_url, "import/xunit-queue"))
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .query(&[("jobIds", job_id)])
            .send()
            .await;
        let queue: QueueResponse = http::json(SERVICE, sent).await?;
        let Some(job) = queue.jobs.first() else {
            return Ok(JobStatus::Pending);
        };
        debug!(job = job_id, status = %job.status, "[POLARION] Queue status");
        Ok(match job.status.as_str() {
            "READY" | "RUNNING" => JobStatus::Running,
            "SUCCESS" => JobStatus::Succeeded,
            other => JobStatus::Failed(other.to_string()),
        })
    }
}

/// Extracts the JUnit report from a test-result zip and rewrites it as a
/// Polarion xunit file.
pub struct XunitTransformer {
    testcase: Regex,
    case_id: Regex,
    name_attr: Regex,
}

impl XunitTransformer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(XunitTransformer {
            testcase: Regex::new(r"(?s)<testcase\b([^>]*?)(?:/>|>(.*?)</testcase>)")?,
            case_id: Regex::new(r"^(?:.+/)*?([A-Z][0-9]{2})_.*$")?,
            name_attr: Regex::new(r#"\bname="([^"]*)""#)?,
        })
    }

    /// Rewrite `junit` with run-level properties. Test cases whose name
    /// carries no Polarion id are dropped.
    pub fn to_xunit(&self, junit: &str, version: &Version, title: &str) -> String {
        let cases = self.testcase.replace_all(junit, |caps: &Captures| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let inner = caps.get(2).map_or("", |m| m.as_str());
            let id = self
                .name_attr
                .captures(attrs)
                .and_then(|n| self.case_id.captures(n.get(1)?.as_str()))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            match id {
                Some(id) => format!(
                    "<testcase{attrs}><properties><property name=\"polarion-testcase-id\" value=\"{id}\"/></properties>{inner}</testcase>"
                ),
                None => String::new(),
            }
        });

        let body = strip_envelope(&cases);
        let properties = [
            ("polarion-project-id", PROJECT_ID.to_string()),
            ("polarion-testrun-title", title.to_string()),
            (
                "polarion-testrun-template-id",
                version.polarion_milestone_id(),
            ),
            ("polarion-lookup-method", "custom".to_string()),
        ];
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites>\n<properties>\n");
        for (name, value) in properties {
            out.push_str(&format!(
                "<property name=\"{name}\" value=\"{}\"/>\n",
                escape_attr(&value)
            ));
        }
        out.push_str("</properties>\n");
        out.push_str(body.trim());
        out.push_str("\n</testsuites>\n");
        out
    }
}

/// Drop the XML declaration and any outer `<testsuites>` element.
fn strip_envelope(xml: &str) -> &str {
    let mut body = xml.trim();
    if body.starts_with("<?xml") {
        body = body.split_once("?>").map_or(body, |(_, rest)| rest.trim());
    }
    if body.starts_with("<testsuites") {
        body = body.split_once('>').map_or(body, |(_, rest)| rest);
        body = body
            .trim_end()
            .strip_suffix("</testsuites>")
            .unwrap_or(body);
    }
    body
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl ArtifactTransformer for XunitTransformer {
    fn prepare(
        &self,
        key: &str,
        artifact: &Path,
        content_sha256: &str,
        workdir: &Path,
    ) -> Result<Prepared, ImportError> {
        let Some(metadata) = read_archive_metadata(artifact)? else {
            return Ok(Prepared::Skip(format!("archive has no {METADATA_FILE}")));
        };
        let Some(raw_version) = metadata.rhmi_version.filter(|v| !v.is_empty()) else {
            return Ok(Prepared::Skip(format!("{METADATA_FILE} has no rhmiVersion")));
        };
        let version = Version::parse(&raw_version, OlmType::default())
            .map_err(|e| ImportError::artifact(key, e))?;
        let name = metadata.name.unwrap_or_default();

        let Some(junit) = read_archive_file(artifact, JUNIT_FILE)? else {
            return Ok(Prepared::Skip(format!("archive has no {JUNIT_FILE}")));
        };
        let junit = String::from_utf8(junit).map_err(|e| ImportError::artifact(key, e))?;
        let title = format!("RHMI {version} {name} Automated Tests");
        let xunit = self.to_xunit(&junit, &version, &title);

        let payload = workdir.join(XUNIT_FILE);
        std::fs::write(&payload, xunit).map_err(|source| ImportError::Io {
            path: payload.clone(),
            source,
        })?;
        Ok(Prepared::Submit(Submission {
            key: key.to_string(),
            name: title,
            version: Some(version.to_string()),
            job_url: metadata.job_url,
            payload,
            content_sha256: content_sha256.to_string(),
        }))
    }
}
