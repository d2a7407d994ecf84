use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type SubmissionId = i64;

/// Classification of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    CompilationError,
    RuntimeError,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::CompilationError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
            Self::Error => "Error",
        }
    }

    /// The verdict a failing test case contributes; `None` for `Passed`
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Passed => None,
            Self::WrongAnswer => Some(Verdict::WrongAnswer),
            Self::TimeLimitExceeded => Some(Verdict::TimeLimitExceeded),
            Self::MemoryLimitExceeded => Some(Verdict::MemoryLimitExceeded),
            Self::CompilationError => Some(Verdict::CompilationError),
            Self::RuntimeError => Some(Verdict::RuntimeError),
            Self::Error => Some(Verdict::InternalError),
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Passed,
            Self::WrongAnswer,
            Self::TimeLimitExceeded,
            Self::MemoryLimitExceeded,
            Self::CompilationError,
            Self::RuntimeError,
            Self::Error,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| format!("unknown test status: {s}"))
    }
}

impl From<TestStatus> for String {
    fn from(status: TestStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<String> for TestStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

/// Terminal classification of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    CompilationError,
    RuntimeError,
    InternalError,
}

impl Verdict {
    const ALL: [Verdict; 7] = [
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::CompilationError,
        Self::RuntimeError,
        Self::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::CompilationError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
            Self::InternalError => "Internal Error",
        }
    }

    /// Higher wins when several failure classes are present in one submission
    pub fn severity(&self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::WrongAnswer => 1,
            Self::MemoryLimitExceeded => 2,
            Self::TimeLimitExceeded => 3,
            Self::RuntimeError => 4,
            Self::CompilationError => 5,
            Self::InternalError => 6,
        }
    }
}

/// Lifecycle state of a submission.
///
/// `Processing` on creation, `Running` once test cases are known, `Testing`
/// while results arrive and `Finished` once every dispatched case is accounted
/// for or judging failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SubmissionStatus {
    Processing,
    Running,
    Testing { completed: u32, total: u32 },
    Finished(Verdict),
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => f.write_str("Processing"),
            Self::Running => f.write_str("Running"),
            Self::Testing { completed, total } => write!(f, "Testing case {completed}/{total}"),
            Self::Finished(verdict) => f.write_str(verdict.as_str()),
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => return Ok(Self::Processing),
            "Running" => return Ok(Self::Running),
            _ => {}
        }

        if let Some(progress) = s.strip_prefix("Testing case ") {
            let (completed, total) = progress
                .split_once('/')
                .ok_or_else(|| format!("malformed progress status: {s}"))?;
            let completed = completed
                .parse()
                .map_err(|_| format!("malformed progress status: {s}"))?;
            let total = total.parse().map_err(|_| format!("malformed progress status: {s}"))?;
            return Ok(Self::Testing { completed, total });
        }

        Verdict::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .map(Self::Finished)
            .ok_or_else(|| format!("unknown submission status: {s}"))
    }
}

impl From<SubmissionStatus> for String {
    fn from(status: SubmissionStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for SubmissionStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// 1-based ordinal in dispatch order
    pub test_case: u32,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub status: TestStatus,
    /// Seconds
    pub execution_time: f64,
    /// Kilobytes
    pub memory_used: i64,
    pub error: Option<String>,
    pub raw_sandbox_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub source_code: String,
    pub status: SubmissionStatus,
    pub test_results: Vec<TestResult>,
    pub total_test_cases: u32,
    pub passed_test_cases: u32,
    pub execution_time: f64,
    pub memory_used: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubmission {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub problem_id: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub source_code: String,
}

impl NewSubmission {
    /// Returns the name of the first empty field, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("userId", &self.user_id),
            ("problemId", &self.problem_id),
            ("language", &self.language),
            ("sourceCode", &self.source_code),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}
