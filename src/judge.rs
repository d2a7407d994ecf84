use std::sync::Arc;

use crate::aggregator::{Aggregator, error_result};
use crate::availability::{apply_fallback, is_available};
use crate::config::{self, Config, Delivery};
use crate::correlation::TokenTable;
use crate::sandbox::{SandboxClient, SandboxError, SandboxJob, SandboxReport, poll_until_terminal};
use crate::store::SubmissionStore;
use crate::submission::{SubmissionId, SubmissionStatus};
use crate::testcases::{TestCaseError, TestCaseStore, load_test_cases};

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error(transparent)]
    TestCases(#[from] TestCaseError),
    #[error("Failed to submit any test cases: {}", .0.join("; "))]
    NoDispatch(Vec<String>),
    #[error("Submission {0} not found")]
    MissingSubmission(SubmissionId),
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Turns one submission into sandbox jobs and routes their results back.
///
/// [`Judge::judge`] covers everything up to dispatch; results land later
/// through the webhook, the per-token pollers or [`Judge::reconcile_expired`].
pub struct Judge {
    store: Arc<SubmissionStore>,
    aggregator: Arc<Aggregator>,
    sandbox: Arc<dyn SandboxClient>,
    cases: Arc<dyn TestCaseStore>,
    config: Arc<Config>,
}

impl Judge {
    pub fn new(
        store: Arc<SubmissionStore>,
        aggregator: Arc<Aggregator>,
        sandbox: Arc<dyn SandboxClient>,
        cases: Arc<dyn TestCaseStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            aggregator,
            sandbox,
            cases,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SubmissionStore> {
        &self.store
    }

    fn tokens(&self) -> &TokenTable {
        self.aggregator.tokens()
    }

    pub async fn judge(&self, id: SubmissionId) -> Result<(), JudgeError> {
        let submission = self
            .store
            .get(id)
            .await?
            .ok_or(JudgeError::MissingSubmission(id))?;

        // 1. Ordered test cases; an empty set is fatal
        let cases = load_test_cases(self.cases.as_ref(), &submission.problem_id).await?;
        let total = cases.len() as u32;

        self.store
            .update(id, |s| {
                s.total_test_cases = total;
                s.status = SubmissionStatus::Running;
            })
            .await?;
        log::info!("Starting evaluation of submission {id} with {total} test cases");

        // 2. Never dispatch to a sandbox that is down
        let sandbox_config = &self.config.sandbox;
        if !is_available(self.sandbox.as_ref(), sandbox_config.probe_timeout()).await {
            log::warn!("Sandbox unavailable, failing every test case of submission {id}");
            self.store.update(id, |s| apply_fallback(s, &cases)).await?;
            return Ok(());
        }

        // 3. Fire every case and continue; failures stay local to their ordinal
        let language_id = config::language_id(&self.config.languages, &submission.language);
        let limits = self.config.limits_for(&submission.problem_id);
        let callback_url = sandbox_config.callback_url();

        let mut dispatched = Vec::with_capacity(cases.len());
        let mut errors = Vec::new();

        for (idx, case) in cases.iter().enumerate() {
            let ordinal = idx as u32 + 1;
            log::debug!("Submitting test case {ordinal}/{total} for submission {id}");

            let job = SandboxJob::encode(
                language_id,
                &submission.source_code,
                case,
                limits,
                callback_url.clone(),
            );

            match self.sandbox.submit(&job).await {
                Ok(token) => {
                    let settled = self
                        .aggregator
                        .register(&token, id, ordinal, case.clone())
                        .await?;
                    dispatched.push((token, settled));
                }
                Err(e) => {
                    log::error!("Error submitting test case {ordinal} of submission {id}: {e}");
                    errors.push(format!("Test case {ordinal}: {e}"));
                    let result = error_result(ordinal, case, e.to_string(), "Submission Error");
                    self.aggregator.record(id, result).await?;
                }
            }
        }

        if dispatched.is_empty() {
            return Err(JudgeError::NoDispatch(errors));
        }
        if !errors.is_empty() {
            log::warn!(
                "{} of {total} test cases failed to submit for submission {id}",
                errors.len()
            );
        }

        // Results that already landed have moved the status on
        self.store
            .update(id, |s| {
                if s.status == SubmissionStatus::Running {
                    s.status = SubmissionStatus::Testing {
                        completed: s.test_results.len() as u32,
                        total,
                    };
                }
            })
            .await?;

        log::info!(
            "Submitted {} test cases for submission {id}, awaiting results via {:?}",
            dispatched.len(),
            sandbox_config.delivery
        );

        if sandbox_config.delivery == Delivery::Poll {
            for (token, settled) in dispatched {
                if !settled {
                    self.spawn_poller(token);
                }
            }
        }

        Ok(())
    }

    /// Polls one token in the background; a timeout fails only that test case
    fn spawn_poller(&self, token: String) {
        let sandbox = self.sandbox.clone();
        let aggregator = self.aggregator.clone();
        let interval = self.config.sandbox.poll_interval();
        let max_attempts = self.config.sandbox.poll_max_attempts;

        tokio::spawn(async move {
            let outcome =
                poll_until_terminal(sandbox.as_ref(), &token, interval, max_attempts).await;
            if let Err(e) = settle(&aggregator, &token, outcome).await {
                log::error!("Failed to record polled result for token {token}: {e}");
            }
        });
    }

    /// Reconciles correlation entries older than the configured TTL.
    ///
    /// Each expired token is fetched once; a terminal result is aggregated as
    /// usual and anything else fails that test case. Returns how many entries
    /// were reconciled.
    pub async fn reconcile_expired(&self) -> usize {
        let expired = self.tokens().take_expired(self.config.sandbox.token_ttl());
        let count = expired.len();

        for (token, entry) in expired {
            log::warn!(
                "Token {token} of submission {} expired without a result, polling once",
                entry.submission_id
            );

            let outcome = match self.sandbox.fetch(&token).await {
                Ok(report) if report.is_terminal() => report.decode().map_err(|e| e.to_string()),
                Ok(_) => Err("result not delivered before expiry".to_string()),
                Err(e) => Err(format!("result not delivered before expiry: {e}")),
            };

            let recorded = match outcome {
                Ok(report) => self.aggregator.apply(entry, report).await,
                Err(message) => self.aggregator.abandon(entry, message, "Not Delivered").await,
            };
            if let Err(e) = recorded {
                log::error!("Failed to reconcile expired token {token}: {e}");
            }
        }

        count
    }
}

async fn settle(
    aggregator: &Aggregator,
    token: &str,
    outcome: Result<SandboxReport, SandboxError>,
) -> sqlx::Result<()> {
    let decoded = outcome.and_then(SandboxReport::decode);
    match decoded {
        Ok(report) => aggregator.deliver(token, report).await?,
        Err(e @ SandboxError::Timeout(_)) => {
            aggregator
                .abandon_token(token, e.to_string(), "Polling Timeout")
                .await?
        }
        Err(e) => aggregator.abandon_token(token, e.to_string(), "Polling Error").await?,
    };
    Ok(())
}
