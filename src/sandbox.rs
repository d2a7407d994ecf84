mod judge0;
mod poll;
mod wire;

pub use judge0::Judge0Client;
pub use poll::poll_until_terminal;
pub use wire::{ExecutionReport, SandboxJob, SandboxReport, SandboxStatus, TokenResponse};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sandbox responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Sandbox did not return a token")]
    MissingToken,
    #[error("Sandbox result polling timeout after {0} attempts")]
    Timeout(u32),
    #[error("Malformed sandbox payload: {0}")]
    Decode(String),
}

/// Client of the external execution service.
///
/// Every call is independent; the adapter keeps no per-submission state.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Health probe; the caller bounds it with its own timeout
    async fn probe(&self) -> Result<(), SandboxError>;

    /// Submits one encoded job and returns the sandbox token
    async fn submit(&self, job: &SandboxJob) -> Result<String, SandboxError>;

    /// Fetches the current state of a job by token
    async fn fetch(&self, token: &str) -> Result<SandboxReport, SandboxError>;
}
