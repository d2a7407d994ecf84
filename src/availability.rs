use std::time::Duration;

use crate::aggregator::error_result;
use crate::sandbox::SandboxClient;
use crate::submission::{Submission, SubmissionStatus, TestResult, Verdict};
use crate::testcases::TestCase;

pub const UNAVAILABLE_MESSAGE: &str =
    "Code evaluation service is currently unavailable. Please try again later.";

/// Probes the sandbox, treating a slow answer the same as no answer
pub async fn is_available(sandbox: &dyn SandboxClient, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, sandbox.probe()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::warn!("Sandbox not available: {e}");
            false
        }
        Err(_) => {
            log::warn!("Sandbox health probe timed out after {timeout:?}");
            false
        }
    }
}

/// One failing result per test case, so nothing reads as passed
pub fn fallback_results(cases: &[TestCase]) -> Vec<TestResult> {
    cases
        .iter()
        .enumerate()
        .map(|(idx, case)| {
            error_result(idx as u32 + 1, case, "sandbox unavailable", "Service Unavailable")
        })
        .collect()
}

/// Short-circuits a submission whose test cases cannot be graded at all
pub fn apply_fallback(submission: &mut Submission, cases: &[TestCase]) {
    submission.test_results = fallback_results(cases);
    submission.total_test_cases = cases.len() as u32;
    submission.passed_test_cases = 0;
    submission.execution_time = 0.0;
    submission.memory_used = 0;
    submission.status = SubmissionStatus::Finished(Verdict::InternalError);
    submission.error_message = Some(UNAVAILABLE_MESSAGE.to_string());
}
