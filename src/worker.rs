use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::judge::Judge;
use crate::queue::JudgeQueue;
use crate::submission::SubmissionId;

pub async fn worker(
    id: u8,
    judge: Arc<Judge>,
    queue: Arc<JudgeQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            submission_id = queue.pop() => {
                log::info!("Worker {id} got submission {submission_id} from queue");
                run_supervised(judge.clone(), submission_id).await;
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

/// Runs one judging task and guarantees the submission never stays in a
/// transient status because the task failed or panicked.
pub async fn run_supervised(judge: Arc<Judge>, submission_id: SubmissionId) {
    let task = {
        let judge = judge.clone();
        tokio::spawn(async move { judge.judge(submission_id).await })
    };

    let failure = match task.await {
        Ok(Ok(())) => {
            log::info!("Submission {submission_id} dispatched");
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => format!("Judging task panicked: {e}"),
        Err(e) => format!("Judging task was cancelled: {e}"),
    };

    if let Err(e) = judge.store().fail(submission_id, failure).await {
        log::error!("Failed to update submission {submission_id} with error status: {e}");
    }
}

/// Periodically reconciles correlation entries whose result never arrived
pub async fn token_sweeper(
    judge: Arc<Judge>,
    period: std::time::Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let reconciled = judge.reconcile_expired().await;
                if reconciled > 0 {
                    log::info!("Reconciled {reconciled} expired sandbox tokens");
                }
            }
        }
    }

    log::info!("Token sweeper has shut down");
}
