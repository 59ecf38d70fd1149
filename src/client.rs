use reqwest::{Client, StatusCode};
use std::time::Duration;
use uuid::Uuid;

use crate::models::verification::{JobStatusResponse, SubmitScanRequest, SubmitScanResponse};

/// How long `wait_for_terminal` keeps asking.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

/// HTTP client for the scan API, used by front ends and smoke tests.
#[derive(Clone)]
pub struct ScanClient {
    http: Client,
    base_url: String,
}

impl ScanClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("eco-scan-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn submit(&self, request: &SubmitScanRequest) -> Result<SubmitScanResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/verify", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Rejected {
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusResponse, ClientError> {
        let response = self
            .http
            .get(format!("{}/verify/status/{}", self.base_url, job_id))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(job_id)),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(ClientError::Rejected {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Poll until the job is terminal. An unknown job stops immediately;
    /// transport errors and 5xx answers use up attempts and are retried.
    ///
    /// A `Timeout` only means this client stopped waiting. The job may still
    /// complete later.
    pub async fn wait_for_terminal(
        &self,
        job_id: Uuid,
        policy: PollPolicy,
    ) -> Result<JobStatusResponse, ClientError> {
        for attempt in 1..=policy.max_attempts {
            match self.status(job_id).await {
                Ok(status) if status.state.is_terminal() => return Ok(status),
                Ok(_) => {
                    tracing::debug!(job_id = %job_id, attempt, "Scan still pending");
                }
                Err(ClientError::Http(e)) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "Status poll failed, retrying");
                }
                Err(ClientError::Rejected { status, .. }) if status.is_server_error() => {
                    tracing::warn!(job_id = %job_id, attempt, %status, "Status poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(ClientError::Timeout {
            job_id,
            attempts: policy.max_attempts,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request rejected with {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} still pending after {attempts} polls")]
    Timeout { job_id: Uuid, attempts: u32 },
}
