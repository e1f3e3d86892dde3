//! Product downtime reports pushed to a Prometheus pushgateway.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use relctl_core::contract::{
    ArtifactTransformer, JobStatus, ObjectTag, Prepared, ReportSink, Submission,
};
use relctl_core::error::{ImportError, RemoteError};
use relctl_core::version::{OlmType, Version};

use crate::http;

const SERVICE: &str = "pushgateway";
pub const DEFAULT_PUSHGATEWAY: &str =
    "http://pushgateway-dh-prod-monitoring.cloud.datahub.psi.redhat.com:9091";
pub const DEFAULT_JOB_NAME: &str = "rhmi-product-downtime";
pub const DEFAULT_REPORT_PREFIX: &str = "downtime-report";
const METRIC: &str = "rhmi_product_downtime";
const POINTS_FILE: &str = "points.json";

pub fn processed_tag() -> ObjectTag {
    ObjectTag::new("datahub", "true")
}

#[derive(Debug, Deserialize)]
struct DowntimeResult {
    name: String,
    #[serde(default)]
    query: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct DowntimeReport {
    #[serde(default)]
    name: String,
    version: String,
    #[serde(default)]
    results: Vec<DowntimeResult>,
}

/// One gauge sample, grouped by product, query and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimePoint {
    pub product: String,
    pub query: String,
    pub version: String,
    pub seconds: i64,
}

/// The integer between `=>` and `@` in a Prometheus result value such as
/// `{} => 120 @[1600000000]`.
pub fn parse_downtime(value: &str) -> Option<i64> {
    let (_, rest) = value.split_once("=>")?;
    let number = rest.split('@').next()?.trim();
    number.parse().ok()
}

pub struct DowntimeTransformer;

impl ArtifactTransformer for DowntimeTransformer {
    fn prepare(
        &self,
        key: &str,
        artifact: &Path,
        content_sha256: &str,
        workdir: &Path,
    ) -> Result<Prepared, ImportError> {
        let raw = std::fs::read_to_string(artifact).map_err(|source| ImportError::Io {
            path: artifact.to_path_buf(),
            source,
        })?;
        let report: DowntimeReport =
            serde_yaml::from_str(&raw).map_err(|e| ImportError::artifact(key, e))?;
        let version = Version::parse(&report.version, OlmType::default())
            .map_err(|e| ImportError::artifact(key, e))?;
        if report.results.is_empty() {
            return Ok(Prepared::Skip("report has no results".to_string()));
        }

        let points = report
            .results
            .iter()
            .map(|result| {
                let seconds = parse_downtime(&result.value).ok_or_else(|| {
                    ImportError::artifact(
                        key,
                        format!("result {} has no downtime value in {:?}", result.name, result.value),
                    )
                })?;
                let product = result.name.split('_').next().unwrap_or(&result.name);
                debug!(result = %result.name, query = %result.query, seconds, "[DATAHUB] Parsed result");
                Ok(DowntimePoint {
                    product: product.to_string(),
                    query: result.name.clone(),
                    version: version.to_string(),
                    seconds,
                })
            })
            .collect::<Result<Vec<_>, ImportError>>()?;

        let payload = workdir.join(POINTS_FILE);
        let json = serde_json::to_vec(&points).map_err(|e| ImportError::artifact(key, e))?;
        std::fs::write(&payload, json).map_err(|source| ImportError::Io {
            path: payload.clone(),
            source,
        })?;
        Ok(Prepared::Submit(Submission {
            key: key.to_string(),
            name: report.name,
            version: Some(version.to_string()),
            job_url: None,
            payload,
            content_sha256: content_sha256.to_string(),
        }))
    }
}

pub struct PushgatewaySink {
    http: Client,
    base_url: String,
    job_name: String,
}

impl PushgatewaySink {
    pub fn new(base_url: impl Into<String>, job_name: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(PushgatewaySink {
            http: http::client()?,
            base_url: base_url.into(),
            job_name: job_name.into(),
        })
    }

    fn url(&self, point: &DowntimePoint) -> String {
        http::join(
            &self.base_url,
            &format!(
                "metrics/job/{}/product/{}/query/{}/version/{}",
                urlencoding::encode(&self.job_name),
                urlencoding::encode(&point.product),
                urlencoding::encode(&point.query),
                urlencoding::encode(&point.version),
            ),
        )
    }
}

fn exposition(seconds: i64) -> String {
    format!("# HELP {METRIC} Downtime count in seconds\n# TYPE {METRIC} gauge\n{METRIC} {seconds}\n")
}

#[async_trait]
impl ReportSink for PushgatewaySink {
    fn name(&self) -> String {
        "datahub".to_string()
    }

    async fn submit(&self, submission: &Submission) -> Result<String, ImportError> {
        let raw = tokio::fs::read(&submission.payload)
            .await
            .map_err(|source| ImportError::Io {
                path: submission.payload.clone(),
                source,
            })?;
        let points: Vec<DowntimePoint> =
            serde_json::from_slice(&raw).map_err(|e| ImportError::artifact(&submission.key, e))?;
        for point in &points {
            let sent = self
                .http
                .put(self.url(point))
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(exposition(point.seconds))
                .send()
                .await;
            http::checked(SERVICE, sent).await?;
            debug!(product = %point.product, query = %point.query, "[DATAHUB] Pushed gauge");
        }
        info!(points = points.len(), key = %submission.key, "[DATAHUB] Report pushed");
        Ok(format!("{}@{}", self.job_name, submission.content_sha256))
    }

    async fn status(&self, _job_id: &str) -> Result<JobStatus, ImportError> {
        Ok(JobStatus::Succeeded)
    }
}
