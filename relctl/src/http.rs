//! Shared `reqwest` plumbing for the remote clients.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use relctl_core::error::RemoteError;

const USER_AGENT: &str = concat!("relctl/", env!("CARGO_PKG_VERSION"));

pub fn client() -> Result<Client, RemoteError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| RemoteError::transport("http", e))
}

/// Turn a sent request into a response with a 2xx status, or a [`RemoteError`]
/// carrying the status and body.
pub async fn checked(
    service: &str,
    sent: Result<Response, reqwest::Error>,
) -> Result<Response, RemoteError> {
    let response = sent.map_err(|e| {
        error!(service, error = %e, "[HTTP] Request failed");
        RemoteError::transport(service, e)
    })?;
    let status = response.status();
    debug!(service, status = %status, url = %response.url(), "[HTTP] Response received");
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(service, status = %status, body = %body, "[HTTP] Non-success status");
    Err(RemoteError::Http {
        service: service.to_string(),
        status: status.as_u16(),
        body,
    })
}

pub async fn json<T: DeserializeOwned>(
    service: &str,
    sent: Result<Response, reqwest::Error>,
) -> Result<T, RemoteError> {
    checked(service, sent)
        .await?
        .json::<T>()
        .await
        .map_err(|e| RemoteError::decode(service, e))
}

pub fn is_not_found(err: &RemoteError) -> bool {
    matches!(err, RemoteError::Http { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
}

/// Join `base` and `path` with exactly one slash between them.
pub fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
