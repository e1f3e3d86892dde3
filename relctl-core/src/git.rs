//! [`Git`] implementation that shells out to the `git` binary.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::contract::{Git, Signature};
use crate::error::GitError;

#[derive(Debug, Clone, Default)]
pub struct GitCli {
    /// URL prefix and token sent with every request under that prefix.
    credentials: Option<(String, String)>,
}

impl GitCli {
    pub fn new() -> Self {
        GitCli::default()
    }

    /// Authenticate clones and fetches against URLs starting with `prefix`.
    /// Other hosts are contacted anonymously.
    pub fn with_credentials(prefix: impl Into<String>, token: impl Into<String>) -> Self {
        GitCli {
            credentials: Some((prefix.into(), token.into())),
        }
    }

    fn scoped_auth(&self) -> Vec<String> {
        self.credentials
            .iter()
            .map(|(prefix, token)| scoped_auth_header(prefix, token))
            .collect()
    }

    /// Run `git [-C repo] [-c config..] args..` and return trimmed stdout.
    /// `config` entries never appear in errors or logs since they may carry
    /// credentials.
    async fn run(
        &self,
        repo: Option<&Path>,
        config: &[String],
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<String, GitError> {
        let command = format!("git {}", args.join(" "));
        let mut cmd = Command::new("git");
        if let Some(repo) = repo {
            cmd.arg("-C").arg(repo);
        }
        for entry in config {
            cmd.arg("-c").arg(entry);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in envs {
            cmd.env(key, value);
        }

        debug!(command = %command, "[GIT] Running");
        let output = cmd.output().await.map_err(|source| {
            error!(command = %command, error = %source, "[GIT] Failed to launch git process");
            GitError::Spawn {
                command: command.clone(),
                source,
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                command = %command,
                status = ?output.status.code(),
                stderr = %stderr,
                "[GIT] Git exited with non-zero code"
            );
            return Err(GitError::Failed {
                command,
                status: output.status.code(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn basic_credentials(token: &str) -> String {
    STANDARD.encode(format!("oauth2:{token}"))
}

fn auth_header(token: &str) -> String {
    format!(
        "http.extraHeader=Authorization: Basic {}",
        basic_credentials(token)
    )
}

fn scoped_auth_header(prefix: &str, token: &str) -> String {
    format!(
        "http.{prefix}.extraHeader=Authorization: Basic {}",
        basic_credentials(token)
    )
}

#[async_trait]
impl Git for GitCli {
    async fn clone_repo(&self, url: &str, reference: &str, dest: &Path) -> Result<(), GitError> {
        let dest_str = dest.to_string_lossy();
        self.run(
            None,
            &self.scoped_auth(),
            &["clone", "--quiet", "--branch", reference, url, &dest_str],
            &[],
        )
        .await?;
        info!(url, reference, path = %dest.display(), "[GIT] Cloned repository");
        Ok(())
    }

    async fn add_remote(&self, repo: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.run(Some(repo), &[], &["remote", "add", name, url], &[])
            .await
            .map(|_| ())
    }

    async fn current_branch(&self, repo: &Path) -> Result<String, GitError> {
        self.run(Some(repo), &[], &["rev-parse", "--abbrev-ref", "HEAD"], &[])
            .await
    }

    async fn remote_branch_exists(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{branch}");
        let out = self
            .run(
                Some(repo),
                &self.scoped_auth(),
                &["ls-remote", "--heads", remote, &refname],
                &[],
            )
            .await?;
        Ok(!out.is_empty())
    }

    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        self.run(Some(repo), &[], &["checkout", "-b", branch], &[])
            .await
            .map(|_| ())
    }

    async fn track_remote_branch(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<(), GitError> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        self.run(
            Some(repo),
            &self.scoped_auth(),
            &["fetch", "--quiet", remote, &refspec],
            &[],
        )
        .await?;
        let start = format!("{remote}/{branch}");
        self.run(Some(repo), &[], &["checkout", "-B", branch, &start], &[])
            .await
            .map(|_| ())
    }

    async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        self.run(Some(repo), &[], &["checkout", branch], &[])
            .await
            .map(|_| ())
    }

    async fn stage(&self, repo: &Path, pathspec: &str) -> Result<(), GitError> {
        self.run(Some(repo), &[], &["add", "-A", "--", pathspec], &[])
            .await
            .map(|_| ())
    }

    async fn commit(
        &self,
        repo: &Path,
        message: &str,
        author: &Signature,
    ) -> Result<String, GitError> {
        let envs = [
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
        ];
        self.run(Some(repo), &[], &["commit", "--quiet", "-m", message], &envs)
            .await?;
        self.run(Some(repo), &[], &["rev-parse", "HEAD"], &[]).await
    }

    async fn status(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let out = self
            .run(Some(repo), &[], &["status", "--porcelain"], &[])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn push(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
        token: Option<String>,
    ) -> Result<(), GitError> {
        let config: Vec<String> = token.as_deref().map(auth_header).into_iter().collect();
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        self.run(Some(repo), &config, &["push", "--quiet", remote, &refspec], &[])
            .await?;
        info!(remote, branch, "[GIT] Pushed branch");
        Ok(())
    }
}
