//! GitLab merge-request client (REST v4).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use relctl_core::contract::{MergeRequest, MergeRequestSpec, MergeRequests};
use relctl_core::error::RemoteError;

use crate::http;

const SERVICE: &str = "gitlab";
pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.cee.redhat.com";

pub struct GitLabClient {
    http: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateMergeRequest<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    target_project_id: u64,
    title: &'a str,
    description: &'a str,
    remove_source_branch: bool,
}

impl GitLabClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(GitLabClient {
            http: http::client()?,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn project_url(&self, project: &str, rest: &str) -> String {
        http::join(
            &self.base_url,
            &format!(
                "api/v4/projects/{}{}",
                urlencoding::encode(project),
                rest
            ),
        )
    }

    async fn project_id(&self, project: &str) -> Result<u64, RemoteError> {
        let sent = self
            .http
            .get(self.project_url(project, ""))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await;
        let found: Project = http::json(SERVICE, sent).await?;
        Ok(found.id)
    }
}

/// `group/project` from a clone URL such as
/// `https://gitlab.example.com/group/project.git` or `git@host:group/project.git`.
pub fn project_from_url(url: &str) -> Option<String> {
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/')?.1,
        None => url.split_once(':')?.1,
    };
    let path = path.trim_end_matches('/').trim_end_matches(".git");
    (!path.is_empty()).then(|| path.to_string())
}

#[async_trait]
impl MergeRequests for GitLabClient {
    async fn find_open(
        &self,
        spec: &MergeRequestSpec,
    ) -> Result<Option<MergeRequest>, RemoteError> {
        let sent = self
            .http
            .get(self.project_url(&spec.target_project, "/merge_requests"))
            .header("PRIVATE-TOKEN", &self.token)
            .query(&[
                ("state", "opened"),
                ("source_branch", spec.source_branch.as_str()),
                ("target_branch", spec.target_branch.as_str()),
            ])
            .send()
            .await;
        let open: Vec<MergeRequest> = http::json(SERVICE, sent).await?;
        Ok(open
            .into_iter()
            .find(|mr| mr.source_branch == spec.source_branch))
    }

    async fn create(&self, spec: &MergeRequestSpec) -> Result<MergeRequest, RemoteError> {
        let target_project_id = self.project_id(&spec.target_project).await?;
        let body = CreateMergeRequest {
            source_branch: &spec.source_branch,
            target_branch: &spec.target_branch,
            target_project_id,
            title: &spec.title,
            description: &spec.description,
            remove_source_branch: spec.remove_source_branch,
        };
        let sent = self
            .http
            .post(self.project_url(&spec.source_project, "/merge_requests"))
            .header("PRIVATE-TOKEN", &self.token)
            .json(&body)
            .send()
            .await;
        let created: MergeRequest = http::json(SERVICE, sent).await?;
        info!(iid = created.iid, url = %created.web_url, "[GITLAB] Merge request created");
        Ok(created)
    }
}
