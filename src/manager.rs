use std::sync::Arc;

use crate::queue::JudgeQueue;
use crate::store::SubmissionStore;
use crate::submission::{NewSubmission, Submission, SubmissionId, SubmissionStatus};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Missing required field: {0}")]
    Invalid(&'static str),
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub const INTERRUPTED_MESSAGE: &str =
    "Judging was interrupted by a server restart; results for this submission were lost";

/// Entry point for everything the UI layer does with submissions
pub struct SubmissionManager {
    store: Arc<SubmissionStore>,
    queue: Arc<JudgeQueue>,
}

impl SubmissionManager {
    pub fn new(store: Arc<SubmissionStore>, queue: Arc<JudgeQueue>) -> Self {
        Self { store, queue }
    }

    /// Persists a `Processing` submission and queues it for judging.
    ///
    /// Returns as soon as the record exists; sandbox latency never reaches
    /// the caller.
    pub async fn submit(&self, body: NewSubmission) -> Result<Submission, SubmitError> {
        if let Some(field) = body.missing_field() {
            return Err(SubmitError::Invalid(field));
        }

        let submission = self.store.create(&body).await?;
        log::info!(
            "Created submission {} for user {} on problem {}",
            submission.id,
            submission.user_id,
            submission.problem_id
        );

        self.queue.push(submission.id).await;
        Ok(submission)
    }

    pub async fn get_by_id(&self, id: SubmissionId) -> sqlx::Result<Option<Submission>> {
        self.store.get(id).await
    }

    pub async fn get_by_user(&self, user_id: &str) -> sqlx::Result<Vec<Submission>> {
        self.store.list_by_user(user_id).await
    }

    /// Resolves submissions left unfinished by a previous process.
    ///
    /// `Processing` ones are queued again. Anything past dispatch lost its
    /// correlation entries with the old process and is failed.
    pub async fn recover(&self) -> sqlx::Result<usize> {
        let unfinished = crate::database::fetch_unfinished(self.store.pool()).await?;
        let count = unfinished.len();

        for (id, status) in unfinished {
            match status {
                SubmissionStatus::Processing => {
                    log::info!("Requeueing submission {id} after restart");
                    self.queue.push(id).await;
                }
                _ => self.store.fail(id, INTERRUPTED_MESSAGE).await?,
            }
        }

        Ok(count)
    }
}
