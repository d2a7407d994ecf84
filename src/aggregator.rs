use std::sync::Arc;

use crate::correlation::{Correlation, TokenTable};
use crate::sandbox::ExecutionReport;
use crate::store::SubmissionStore;
use crate::submission::{
    Submission, SubmissionId, SubmissionStatus, TestResult, TestStatus, Verdict,
};
use crate::testcases::TestCase;

/// Maps a decoded sandbox report onto a test case status.
///
/// Status 3 only means the program ran to completion; the verdict then comes
/// from comparing trimmed output with the trimmed expected output.
pub fn classify(report: &ExecutionReport, expected_output: &str) -> TestStatus {
    let Some(status) = &report.status else {
        return TestStatus::Error;
    };

    match status.id {
        3 if report.stdout.trim() == expected_output.trim() => TestStatus::Passed,
        3 | 4 => TestStatus::WrongAnswer,
        5 => TestStatus::TimeLimitExceeded,
        6 => TestStatus::CompilationError,
        8 => TestStatus::MemoryLimitExceeded,
        7 | 9..=12 => TestStatus::RuntimeError,
        _ => TestStatus::Error,
    }
}

pub fn build_result(test_case: u32, case: &TestCase, report: ExecutionReport) -> TestResult {
    let status = classify(&report, &case.expected_output);
    let error = report.diagnostic();
    let raw_sandbox_status = report
        .status
        .as_ref()
        .map(|s| s.description.clone())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    TestResult {
        test_case,
        input: case.input.clone(),
        expected_output: case.expected_output.clone(),
        actual_output: report.stdout,
        status,
        execution_time: report.time,
        memory_used: report.memory,
        error,
        raw_sandbox_status,
    }
}

/// A result for a test case that could not be graded
pub fn error_result(
    test_case: u32,
    case: &TestCase,
    error: impl Into<String>,
    raw_sandbox_status: &str,
) -> TestResult {
    TestResult {
        test_case,
        input: case.input.clone(),
        expected_output: case.expected_output.clone(),
        actual_output: String::new(),
        status: TestStatus::Error,
        execution_time: 0.0,
        memory_used: 0,
        error: Some(error.into()),
        raw_sandbox_status: raw_sandbox_status.to_string(),
    }
}

/// Inserts or replaces the result at its ordinal and recomputes the aggregate
pub fn fold(submission: &mut Submission, result: TestResult) {
    match submission
        .test_results
        .binary_search_by_key(&result.test_case, |r| r.test_case)
    {
        Ok(idx) => submission.test_results[idx] = result,
        Err(idx) => submission.test_results.insert(idx, result),
    }
    recompute(submission);
}

/// Recomputes counters, maxima and status from the recorded results
pub fn recompute(submission: &mut Submission) {
    let results = &submission.test_results;
    let completed = results.len() as u32;
    let passed = results
        .iter()
        .filter(|r| r.status == TestStatus::Passed)
        .count() as u32;

    submission.total_test_cases = submission.total_test_cases.max(completed);
    submission.passed_test_cases = passed;
    submission.execution_time = results.iter().map(|r| r.execution_time).fold(0.0, f64::max);
    submission.memory_used = results.iter().map(|r| r.memory_used).max().unwrap_or(0);

    // A fatal failure is final regardless of late results
    if submission.status == SubmissionStatus::Finished(Verdict::InternalError) {
        return;
    }

    let total = submission.total_test_cases;
    if completed < total {
        submission.status = SubmissionStatus::Testing { completed, total };
        return;
    }

    let verdict = final_verdict(results);
    submission.status = SubmissionStatus::Finished(verdict);
    submission.error_message = match verdict {
        Verdict::Accepted => None,
        _ => Some(format!(
            "Failed {} out of {total} test cases",
            total - passed
        )),
    };
}

/// The most severe failing classification, or `Accepted` if there is none
pub fn final_verdict(results: &[TestResult]) -> Verdict {
    results
        .iter()
        .filter_map(|r| r.status.verdict())
        .max_by_key(|v| v.severity())
        .unwrap_or(Verdict::Accepted)
}

#[derive(Debug, PartialEq)]
pub enum Delivery {
    Applied {
        submission_id: SubmissionId,
        test_case: u32,
    },
    /// Unknown or already consumed token
    Ignored,
    /// Unknown token whose result is kept until it is registered
    Held,
}

/// Folds per-test-case results into their submission
pub struct Aggregator {
    store: Arc<SubmissionStore>,
    tokens: Arc<TokenTable>,
}

impl Aggregator {
    pub fn new(store: Arc<SubmissionStore>, tokens: Arc<TokenTable>) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    /// Consumes the token's correlation entry and records its result.
    ///
    /// A result for an unknown token is held briefly in case the token is
    /// still being registered, and applied by [`Aggregator::register`].
    /// Delivering a consumed token again has no effect. If the result cannot
    /// be persisted the entry is put back so expiry can reconcile it later.
    pub async fn deliver(&self, token: &str, report: ExecutionReport) -> sqlx::Result<Delivery> {
        let Some((entry, report)) = self.tokens.take_or_hold(token, report) else {
            log::warn!("Holding result for unknown or already consumed token {token}");
            return Ok(Delivery::Held);
        };

        self.apply_or_restore(token, entry, report).await
    }

    /// Registers a dispatched token, applying its result right away if the
    /// sandbox reported before the token was known.
    ///
    /// Returns `true` when the result was already applied.
    pub async fn register(
        &self,
        token: &str,
        submission_id: SubmissionId,
        test_case: u32,
        case: TestCase,
    ) -> sqlx::Result<bool> {
        let early = self.tokens.register(token, submission_id, test_case, case);
        match early {
            Some((entry, report)) => {
                self.apply_or_restore(token, entry, report).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_or_restore(
        &self,
        token: &str,
        entry: Correlation,
        report: ExecutionReport,
    ) -> sqlx::Result<Delivery> {
        match self.apply(entry.clone(), report).await {
            Ok(delivery) => Ok(delivery),
            Err(e) => {
                self.tokens.restore(token, entry);
                Err(e)
            }
        }
    }

    /// Records a sandbox report for an entry that was already taken from the table
    pub async fn apply(
        &self,
        entry: Correlation,
        report: ExecutionReport,
    ) -> sqlx::Result<Delivery> {
        log::info!(
            "Processing result for submission {}, test case {}",
            entry.submission_id,
            entry.test_case
        );

        let result = build_result(entry.test_case, &entry.case, report);
        self.record(entry.submission_id, result).await?;

        Ok(Delivery::Applied {
            submission_id: entry.submission_id,
            test_case: entry.test_case,
        })
    }

    /// Records an `Error` result for an entry whose outcome will never be known
    pub async fn abandon(
        &self,
        entry: Correlation,
        error: impl Into<String>,
        raw_sandbox_status: &str,
    ) -> sqlx::Result<Delivery> {
        let error = error.into();
        log::warn!(
            "Giving up on submission {}, test case {}: {error}",
            entry.submission_id,
            entry.test_case
        );

        let result = error_result(entry.test_case, &entry.case, error, raw_sandbox_status);
        self.record(entry.submission_id, result).await?;

        Ok(Delivery::Applied {
            submission_id: entry.submission_id,
            test_case: entry.test_case,
        })
    }

    /// Like [`Aggregator::abandon`], keyed by token; a no-op for unknown tokens
    pub async fn abandon_token(
        &self,
        token: &str,
        error: impl Into<String>,
        raw_sandbox_status: &str,
    ) -> sqlx::Result<Delivery> {
        match self.tokens.take(token) {
            Some(entry) => self.abandon(entry, error, raw_sandbox_status).await,
            None => Ok(Delivery::Ignored),
        }
    }

    pub async fn record(
        &self,
        submission_id: SubmissionId,
        result: TestResult,
    ) -> sqlx::Result<Option<Submission>> {
        let test_case = result.test_case;
        let updated = self
            .store
            .update(submission_id, |s| fold(s, result))
            .await?;

        if let Some(s) = &updated {
            log::info!(
                "Updated submission {submission_id} with test case {test_case}: {} ({}/{} passed)",
                s.status,
                s.passed_test_cases,
                s.total_test_cases
            );
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxStatus;
    use pretty_assertions::assert_eq;

    fn report(id: u32, stdout: &str) -> ExecutionReport {
        ExecutionReport {
            stdout: stdout.to_string(),
            status: Some(SandboxStatus {
                id,
                description: format!("status {id}"),
            }),
            ..Default::default()
        }
    }

    fn case(expected: &str) -> TestCase {
        TestCase {
            input: String::new(),
            expected_output: expected.to_string(),
        }
    }

    fn result(test_case: u32, status: TestStatus, time: f64, memory: i64) -> TestResult {
        TestResult {
            test_case,
            input: String::new(),
            expected_output: String::new(),
            actual_output: String::new(),
            status,
            execution_time: time,
            memory_used: memory,
            error: None,
            raw_sandbox_status: String::new(),
        }
    }

    fn running(total: u32) -> Submission {
        Submission {
            id: 1,
            user_id: "u".to_string(),
            problem_id: "p".to_string(),
            language: "Python".to_string(),
            source_code: "print(1)".to_string(),
            status: SubmissionStatus::Running,
            test_results: Vec::new(),
            total_test_cases: total,
            passed_test_cases: 0,
            execution_time: 0.0,
            memory_used: 0,
            error_message: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&report(3, "42\n"), " 42"), TestStatus::Passed);
        assert_eq!(classify(&report(3, "41"), "42"), TestStatus::WrongAnswer);
        assert_eq!(classify(&report(4, "42"), "42"), TestStatus::WrongAnswer);
        assert_eq!(classify(&report(5, ""), "42"), TestStatus::TimeLimitExceeded);
        assert_eq!(classify(&report(6, ""), "42"), TestStatus::CompilationError);
        assert_eq!(classify(&report(7, ""), "42"), TestStatus::RuntimeError);
        assert_eq!(classify(&report(8, ""), "42"), TestStatus::MemoryLimitExceeded);
        assert_eq!(classify(&report(11, ""), "42"), TestStatus::RuntimeError);
        assert_eq!(classify(&report(13, ""), "42"), TestStatus::Error);
        assert_eq!(classify(&ExecutionReport::default(), "42"), TestStatus::Error);
    }

    #[test]
    fn test_build_result_keeps_dispatch_copy() {
        let mut r = report(6, "");
        r.compile_output = Some("main.py: syntax error".to_string());
        r.time = 0.5;
        let built = build_result(2, &case("7"), r);
        assert_eq!(built.test_case, 2);
        assert_eq!(built.expected_output, "7");
        assert_eq!(built.status, TestStatus::CompilationError);
        assert_eq!(built.error.as_deref(), Some("main.py: syntax error"));
        assert_eq!(built.raw_sandbox_status, "status 6");
    }

    #[test]
    fn test_fold_progress_and_maxima() {
        let mut s = running(3);
        fold(&mut s, result(2, TestStatus::Passed, 0.3, 100));
        assert_eq!(s.status, SubmissionStatus::Testing { completed: 1, total: 3 });

        fold(&mut s, result(1, TestStatus::Passed, 0.1, 900));
        assert_eq!(s.status.to_string(), "Testing case 2/3");
        assert_eq!(s.execution_time, 0.3);
        assert_eq!(s.memory_used, 900);

        fold(&mut s, result(3, TestStatus::Passed, 0.2, 50));
        assert_eq!(s.status, SubmissionStatus::Finished(Verdict::Accepted));
        assert_eq!(s.passed_test_cases, 3);
        assert_eq!(s.error_message, None);
        let ordinals: Vec<_> = s.test_results.iter().map(|r| r.test_case).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_fold_duplicate_does_not_double_count() {
        let mut s = running(2);
        fold(&mut s, result(1, TestStatus::Passed, 0.1, 1));
        fold(&mut s, result(1, TestStatus::Passed, 0.1, 1));
        assert_eq!(s.test_results.len(), 1);
        assert_eq!(s.passed_test_cases, 1);
        assert_eq!(s.status, SubmissionStatus::Testing { completed: 1, total: 2 });
    }

    #[test]
    fn test_reverse_order_matches_forward_order() {
        let results = vec![
            result(1, TestStatus::Passed, 0.1, 10),
            result(2, TestStatus::WrongAnswer, 0.4, 30),
            result(3, TestStatus::Passed, 0.2, 20),
        ];

        let mut forward = running(3);
        for r in results.iter().cloned() {
            fold(&mut forward, r);
        }
        let mut reverse = running(3);
        for r in results.iter().rev().cloned() {
            fold(&mut reverse, r);
        }

        assert_eq!(forward, reverse);
        assert_eq!(forward.status, SubmissionStatus::Finished(Verdict::WrongAnswer));
        assert_eq!(forward.passed_test_cases, 2);
        assert_eq!(forward.error_message.as_deref(), Some("Failed 1 out of 3 test cases"));
    }

    #[test]
    fn test_verdict_precedence() {
        let verdict = |statuses: &[TestStatus]| {
            let results: Vec<_> = statuses
                .iter()
                .enumerate()
                .map(|(i, s)| result(i as u32 + 1, *s, 0.0, 0))
                .collect();
            final_verdict(&results)
        };

        use TestStatus::*;
        assert_eq!(verdict(&[Passed, Passed]), Verdict::Accepted);
        assert_eq!(verdict(&[WrongAnswer, MemoryLimitExceeded]), Verdict::MemoryLimitExceeded);
        assert_eq!(verdict(&[MemoryLimitExceeded, TimeLimitExceeded]), Verdict::TimeLimitExceeded);
        assert_eq!(verdict(&[TimeLimitExceeded, RuntimeError]), Verdict::RuntimeError);
        assert_eq!(
            verdict(&[RuntimeError, CompilationError, WrongAnswer]),
            Verdict::CompilationError
        );
        assert_eq!(verdict(&[CompilationError, Error, Passed]), Verdict::InternalError);
    }

    #[test]
    fn test_internal_error_is_sticky() {
        let mut s = running(3);
        s.status = SubmissionStatus::Finished(Verdict::InternalError);
        s.error_message = Some("boom".to_string());
        fold(&mut s, result(1, TestStatus::Passed, 0.1, 1));
        assert_eq!(s.status, SubmissionStatus::Finished(Verdict::InternalError));
        assert_eq!(s.error_message.as_deref(), Some("boom"));
        assert_eq!(s.passed_test_cases, 1);
    }
}
