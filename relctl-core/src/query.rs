//! Prometheus query fan-out into a single YAML report.
//!
//! A report config lists named queries. Each one runs as its own task through
//! [`crate::runner::run`] with a per-query timeout; results come back in
//! config order and are written as `<report-name>.yaml`.
//!
//! Query text may reference the report window: `$range` expands to its length
//! in milliseconds and `$duration` to its length in whole seconds with an `s`
//! suffix, so `avg_over_time(up[$duration])` covers exactly the window.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::contract::{MetricsApi, QueryValue};
use crate::error::QueryError;
use crate::runner;

pub const DEFAULT_QUERY_WORKERS: usize = 5;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);
pub const RANGE_STEP_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Query,
    QueryRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuerySpec {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryReportConfig {
    pub name: String,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

/// Time window shared by every query of a report, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: i64,
    pub end: i64,
}

impl QueryWindow {
    /// An explicit `start` wins over `length`.
    pub fn new(end: i64, start: Option<i64>, length: Duration) -> Self {
        match start {
            Some(start) => QueryWindow { start, end },
            None => QueryWindow {
                start: end - length.as_secs() as i64,
                end,
            },
        }
    }

    pub fn length(&self) -> Duration {
        Duration::from_secs((self.end - self.start).max(0) as u64)
    }

    /// Substitute `$range` and `$duration` in `query`.
    pub fn expand(&self, query: &str) -> String {
        let length = self.length();
        query
            .replace("$range", &length.as_millis().to_string())
            .replace("$duration", &format!("{}s", length.as_secs()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub name: String,
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: serde_json::Value,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub name: String,
    pub results: Vec<QueryResult>,
}

impl QueryReport {
    /// `<name>.yaml` with the name lower-cased and spaces turned into dashes.
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.name.to_lowercase().replace(' ', "-"))
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, QueryError> {
        let path = dir.join(self.file_name());
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|source| QueryError::Io {
            path: path.clone(),
            source,
        })?;
        info!(file = %path.display(), results = self.results.len(), "[QUERY] Report written");
        Ok(path)
    }
}

#[derive(Clone)]
pub struct QueryRunner {
    api: Arc<dyn MetricsApi>,
    window: QueryWindow,
    timeout: Duration,
    workers: usize,
}

impl QueryRunner {
    pub fn new(api: Arc<dyn MetricsApi>, window: QueryWindow) -> Self {
        QueryRunner {
            api,
            window,
            timeout: DEFAULT_QUERY_TIMEOUT,
            workers: DEFAULT_QUERY_WORKERS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Run every query of `config`. The first failing query fails the report.
    pub async fn run(
        &self,
        config: &QueryReportConfig,
        cancel: &CancellationToken,
    ) -> Result<QueryReport, QueryError> {
        info!(
            report = %config.name,
            queries = config.queries.len(),
            start = self.window.start,
            end = self.window.end,
            "[QUERY] Running report queries"
        );
        let tasks: Vec<_> = config
            .queries
            .iter()
            .cloned()
            .map(|spec| {
                let runner = self.clone();
                move || async move { runner.run_one(spec).await }
            })
            .collect();
        let results = runner::run(tasks, self.workers, cancel).await?;
        Ok(QueryReport {
            name: config.name.clone(),
            results,
        })
    }

    async fn run_one(&self, spec: QuerySpec) -> Result<QueryResult, QueryError> {
        let query = self.window.expand(&spec.query);
        debug!(name = %spec.name, query = %query, "[QUERY] Sending query");
        let call = async {
            match spec.kind {
                QueryKind::Query => self.api.query(&query, self.window.end).await,
                QueryKind::QueryRange => {
                    self.api
                        .query_range(&query, self.window.start, self.window.end, RANGE_STEP_SECS)
                        .await
                }
            }
        };
        let value: QueryValue = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| QueryError::Timeout {
                name: spec.name.clone(),
                waited: self.timeout,
            })?
            .map_err(|source| QueryError::Remote {
                name: spec.name.clone(),
                source,
            })?;
        Ok(QueryResult {
            name: spec.name,
            result_type: value.result_type,
            result: value.result,
            query: spec.query,
        })
    }
}
