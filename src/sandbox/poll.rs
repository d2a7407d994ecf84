use std::time::Duration;

use super::{SandboxClient, SandboxError, SandboxReport};

/// Polls a token until the sandbox reports a terminal status.
///
/// Fetch errors are retried within the same budget; the last one is returned
/// if it happens on the final attempt.
pub async fn poll_until_terminal(
    client: &dyn SandboxClient,
    token: &str,
    interval: Duration,
    max_attempts: u32,
) -> Result<SandboxReport, SandboxError> {
    for attempt in 1..=max_attempts {
        match client.fetch(token).await {
            Ok(report) if report.is_terminal() => return Ok(report),
            Ok(report) => {
                log::debug!(
                    "Polling {token} attempt {attempt}: status {:?}",
                    report.status.as_ref().map(|s| s.id)
                );
            }
            Err(e) if attempt == max_attempts => return Err(e),
            Err(e) => log::warn!("Polling {token} attempt {attempt} failed: {e}"),
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(SandboxError::Timeout(max_attempts))
}
