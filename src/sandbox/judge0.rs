use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use super::{SandboxClient, SandboxError, SandboxJob, SandboxReport, TokenResponse};
use crate::config::SandboxConfig;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a Judge0-compatible execution service
pub struct Judge0Client {
    http: Client,
    base_url: String,
    probe_timeout: Duration,
    submit_timeout: Duration,
}

impl Judge0Client {
    pub fn build(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let http = Client::builder().build()?;
        let base_url = config
            .url
            .trim_end_matches('/')
            .trim_end_matches("/submissions")
            .to_string();

        log::info!("Sandbox client targeting {base_url}");

        Ok(Self {
            http,
            base_url,
            probe_timeout: config.probe_timeout(),
            submit_timeout: config.submit_timeout(),
        })
    }

    async fn ensure_success(response: Response) -> Result<Response, SandboxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SandboxError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SandboxClient for Judge0Client {
    async fn probe(&self) -> Result<(), SandboxError> {
        let response = self
            .http
            .get(format!("{}/system_info", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Self::ensure_success(response).await.map(|_| ())
    }

    async fn submit(&self, job: &SandboxJob) -> Result<String, SandboxError> {
        log::debug!(
            "Submitting job to sandbox: language_id={}, stdin_len={}, callback={:?}",
            job.language_id,
            job.stdin.len(),
            job.callback_url
        );

        let response = self
            .http
            .post(format!("{}/submissions", self.base_url))
            .query(&[("base64_encoded", "true"), ("wait", "false")])
            .json(job)
            .timeout(self.submit_timeout)
            .send()
            .await?;

        let TokenResponse { token } = Self::ensure_success(response).await?.json().await?;
        token
            .filter(|t| !t.is_empty())
            .ok_or(SandboxError::MissingToken)
    }

    async fn fetch(&self, token: &str) -> Result<SandboxReport, SandboxError> {
        let response = self
            .http
            .get(format!("{}/submissions/{token}", self.base_url))
            .query(&[("base64_encoded", "true"), ("fields", "*")])
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        Ok(Self::ensure_success(response).await?.json().await?)
    }
}
