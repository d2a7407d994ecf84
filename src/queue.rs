use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::submission::SubmissionId;

/// Submissions waiting for a judging worker
pub struct JudgeQueue {
    queue: Mutex<VecDeque<SubmissionId>>,
    notify: Notify,
}

impl JudgeQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, id: SubmissionId) {
        self.queue.lock().await.push_back(id);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> SubmissionId {
        loop {
            if let Some(id) = self.queue.lock().await.pop_front() {
                return id;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for JudgeQueue {
    fn default() -> Self {
        Self::new()
    }
}
