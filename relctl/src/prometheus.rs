//! [`MetricsApi`] over the Prometheus HTTP API (`/api/v1/query*`).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use relctl_core::contract::{MetricsApi, QueryValue};
use relctl_core::error::RemoteError;

use crate::http;

const SERVICE: &str = "prometheus";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<QueryValue>,
    #[serde(default)]
    error: Option<String>,
}

impl Envelope {
    fn into_value(self) -> Result<QueryValue, RemoteError> {
        match (self.status.as_str(), self.data) {
            ("success", Some(data)) => Ok(data),
            _ => Err(RemoteError::decode(
                SERVICE,
                self.error
                    .unwrap_or_else(|| format!("query returned status {}", self.status)),
            )),
        }
    }
}

pub struct PrometheusClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl PrometheusClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        Ok(PrometheusClient {
            http: http::client()?,
            base_url: base_url.into(),
            token,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.http.get(http::join(&self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl MetricsApi for PrometheusClient {
    async fn query(&self, query: &str, time: i64) -> Result<QueryValue, RemoteError> {
        let sent = self
            .get("api/v1/query")
            .query(&[("query", query.to_string()), ("time", time.to_string())])
            .send()
            .await;
        let value = http::json::<Envelope>(SERVICE, sent).await?.into_value()?;
        debug!(query, result_type = %value.result_type, "[PROMETHEUS] Instant query answered");
        Ok(value)
    }

    async fn query_range(
        &self,
        query: &str,
        start: i64,
        end: i64,
        step_secs: u64,
    ) -> Result<QueryValue, RemoteError> {
        let sent = self
            .get("api/v1/query_range")
            .query(&[
                ("query", query.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("step", format!("{step_secs}s")),
            ])
            .send()
            .await;
        let value = http::json::<Envelope>(SERVICE, sent).await?.into_value()?;
        debug!(query, result_type = %value.result_type, "[PROMETHEUS] Range query answered");
        Ok(value)
    }
}
