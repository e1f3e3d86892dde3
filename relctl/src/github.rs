//! GitHub client for branch heads and lightweight tags.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use relctl_core::contract::SourceTags;
use relctl_core::error::RemoteError;

use crate::http;

const SERVICE: &str = "github";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

pub struct GitHubClient {
    http: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Branch {
    commit: BranchCommit,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(GitHubClient {
            http: http::client()?,
            api_url: api_url.into(),
            token: token.into(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    fn url(&self, path: &str) -> String {
        http::join(&self.api_url, path)
    }
}

#[async_trait]
impl SourceTags for GitHubClient {
    async fn branch_head(&self, repo: &str, branch: &str) -> Result<String, RemoteError> {
        let url = self.url(&format!(
            "repos/{repo}/branches/{}",
            urlencoding::encode(branch)
        ));
        let sent = self.authed(self.http.get(url)).send().await;
        let found: Branch = http::json(SERVICE, sent).await?;
        Ok(found.commit.sha)
    }

    async fn tag_target(&self, repo: &str, tag: &str) -> Result<Option<String>, RemoteError> {
        let url = self.url(&format!("repos/{repo}/git/ref/tags/{tag}"));
        let sent = self.authed(self.http.get(url)).send().await;
        let found: GitRef = match http::json(SERVICE, sent).await {
            Ok(found) => found,
            Err(e) if http::is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        if found.object.kind != "tag" {
            return Ok(Some(found.object.sha));
        }

        // Annotated tag: resolve the tag object to the commit it points at.
        debug!(repo, tag, "[GITHUB] Dereferencing annotated tag");
        let url = self.url(&format!("repos/{repo}/git/tags/{}", found.object.sha));
        let sent = self.authed(self.http.get(url)).send().await;
        let annotated: GitRef = http::json(SERVICE, sent).await?;
        Ok(Some(annotated.object.sha))
    }

    async fn create_tag(&self, repo: &str, tag: &str, sha: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("repos/{repo}/git/refs"));
        let body = json!({ "ref": format!("refs/tags/{tag}"), "sha": sha });
        let sent = self.authed(self.http.post(url)).json(&body).send().await;
        http::checked(SERVICE, sent).await.map(|_| ())
    }
}
