use sqlx::SqlitePool;

use crate::database as db;
use crate::locks::KeyedLocks;
use crate::submission::{NewSubmission, Submission, SubmissionId, SubmissionStatus, Verdict};

/// Persistence for submissions with a per-submission critical section.
///
/// Every read-modify-write after creation goes through [`SubmissionStore::update`]
/// so concurrent deliveries for the same submission cannot lose updates.
pub struct SubmissionStore {
    pool: SqlitePool,
    locks: KeyedLocks<SubmissionId>,
}

impl SubmissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: KeyedLocks::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create(&self, body: &NewSubmission) -> sqlx::Result<Submission> {
        db::create_submission(&self.pool, body).await
    }

    pub async fn get(&self, id: SubmissionId) -> sqlx::Result<Option<Submission>> {
        db::fetch_submission(&self.pool, id).await
    }

    pub async fn list_by_user(&self, user_id: &str) -> sqlx::Result<Vec<Submission>> {
        db::fetch_submissions_by_user(&self.pool, user_id).await
    }

    /// Applies `f` to the stored submission and persists the result.
    ///
    /// Returns the updated record, or `None` if the submission does not exist.
    pub async fn update<F>(&self, id: SubmissionId, f: F) -> sqlx::Result<Option<Submission>>
    where
        F: FnOnce(&mut Submission),
    {
        let _guard = self.locks.lock(id).await;

        let Some(mut submission) = db::fetch_submission(&self.pool, id).await? else {
            log::warn!("Submission {id} vanished before it could be updated");
            return Ok(None);
        };

        f(&mut submission);
        submission.updated_at = crate::create_timestamp();
        db::save_submission(&self.pool, &submission).await?;

        Ok(Some(submission))
    }

    /// Moves a submission to `InternalError`, keeping whatever results it has
    pub async fn fail(&self, id: SubmissionId, message: impl Into<String>) -> sqlx::Result<()> {
        let message = message.into();
        log::error!("Submission {id} failed: {message}");

        self.update(id, |s| {
            s.status = SubmissionStatus::Finished(Verdict::InternalError);
            s.error_message = Some(message);
        })
        .await
        .map(|_| ())
    }
}
