// Authenticated point requests against the job service
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use url::Url;

use crate::error::ApiError;
use crate::models::{JobId, StatusSnapshot};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Deserialize)]
struct LogDump {
    logs: String,
}

/// The request-issuing capability one job session depends on. Stateless and
/// reentrant: implementations own no session state and never retry — recovery
/// policy belongs to the caller. Abstracted so tests can script responses.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn fetch_status(&self, id: &JobId) -> Result<StatusSnapshot, ApiError>;
    async fn fetch_logs(&self, id: &JobId) -> Result<String, ApiError>;
    async fn stop_job(&self, id: &JobId) -> Result<(), ApiError>;
    async fn download_artifact(&self, id: &JobId) -> Result<Vec<u8>, ApiError>;
}

/// HTTP implementation of [`JobApi`]. The bearer credential is supplied by
/// the surrounding application and only forwarded, never stored elsewhere or
/// refreshed here.
pub struct CommandClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl CommandClient {
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn job_url(&self, id: &JobId, suffix: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{}/jobs/{}/{}", base, id, suffix)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 | 403 => Err(ApiError::Auth(status)),
            404 => Err(ApiError::NotFound),
            _ => {
                let detail = match response.json::<ErrorBody>().await {
                    Ok(body) => body.detail,
                    Err(_) => "unknown error".to_string(),
                };
                Err(ApiError::Server { status, detail })
            }
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await
    }
}

#[async_trait]
impl JobApi for CommandClient {
    async fn fetch_status(&self, id: &JobId) -> Result<StatusSnapshot, ApiError> {
        let url = self.job_url(id, "status");
        debug!("Fetching status snapshot for job {}", id);
        Ok(self.get(&url).await?.json::<StatusSnapshot>().await?)
    }

    async fn fetch_logs(&self, id: &JobId) -> Result<String, ApiError> {
        let url = self.job_url(id, "logs");
        debug!("Fetching log dump for job {}", id);
        Ok(self.get(&url).await?.json::<LogDump>().await?.logs)
    }

    async fn stop_job(&self, id: &JobId) -> Result<(), ApiError> {
        let url = self.job_url(id, "stop");
        debug!("Requesting stop for job {}", id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn download_artifact(&self, id: &JobId) -> Result<Vec<u8>, ApiError> {
        let url = self.job_url(id, "artifact");
        debug!("Downloading artifact for job {}", id);
        let response = self.get(&url).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
