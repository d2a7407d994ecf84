#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use serde_json::{Value, json};

use judge_orchestrator::aggregator::Aggregator;
use judge_orchestrator::config::Config;
use judge_orchestrator::correlation::TokenTable;
use judge_orchestrator::database as db;
use judge_orchestrator::judge::Judge;
use judge_orchestrator::manager::SubmissionManager;
use judge_orchestrator::queue::JudgeQueue;
use judge_orchestrator::sandbox::{
    ExecutionReport, SandboxClient, SandboxError, SandboxJob, SandboxReport, SandboxStatus,
};
use judge_orchestrator::store::SubmissionStore;
use judge_orchestrator::submission::{NewSubmission, Submission, SubmissionId};
use judge_orchestrator::testcases::FsTestCaseStore;

pub const PROBLEM: &str = "sum";

/// In-process stand-in for the execution service.
///
/// Tokens are `token-1`, `token-2`, ... in submit order. Submits whose
/// 1-based number is in `failing_submits` are rejected. Once
/// [`MockSandbox::call_back_early`] is set, scripted results are delivered
/// to the aggregator before `submit` returns the token.
#[derive(Default)]
pub struct MockSandbox {
    pub unavailable: bool,
    pub failing_submits: HashSet<usize>,
    submitted: Mutex<Vec<SandboxJob>>,
    reports: Mutex<HashMap<String, SandboxReport>>,
    early: OnceLock<Arc<Aggregator>>,
}

impl MockSandbox {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn failing(submits: &[usize]) -> Self {
        Self {
            failing_submits: submits.iter().copied().collect(),
            ..Default::default()
        }
    }

    /// Makes `fetch` return a finished report for `token`
    pub fn script(&self, token: &str, status_id: u32, stdout: &str) {
        self.reports.lock().insert(
            token.to_string(),
            SandboxReport {
                token: Some(token.to_string()),
                stdout: Some(STANDARD.encode(stdout)),
                status: Some(status(status_id)),
                time: Some(0.01),
                memory: Some(1024),
                ..Default::default()
            },
        );
    }

    pub fn call_back_early(&self, aggregator: Arc<Aggregator>) {
        let _ = self.early.set(aggregator);
    }

    pub fn submitted(&self) -> Vec<SandboxJob> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl SandboxClient for MockSandbox {
    async fn probe(&self) -> Result<(), SandboxError> {
        if self.unavailable {
            return Err(SandboxError::Status {
                status: 503,
                body: "down".to_string(),
            });
        }
        Ok(())
    }

    async fn submit(&self, job: &SandboxJob) -> Result<String, SandboxError> {
        let n = {
            let mut submitted = self.submitted.lock();
            submitted.push(job.clone());
            submitted.len()
        };

        if self.failing_submits.contains(&n) {
            return Err(SandboxError::Status {
                status: 500,
                body: "queue full".to_string(),
            });
        }

        let token = format!("token-{n}");
        let scripted = self.reports.lock().get(&token).cloned();
        if let (Some(aggregator), Some(report)) = (self.early.get(), scripted) {
            let delivery = aggregator.deliver(&token, report.decode()?).await;
            assert!(delivery.is_ok(), "early delivery failed: {delivery:?}");
        }
        Ok(token)
    }

    async fn fetch(&self, token: &str) -> Result<SandboxReport, SandboxError> {
        Ok(self
            .reports
            .lock()
            .get(token)
            .cloned()
            .unwrap_or_else(|| SandboxReport {
                token: Some(token.to_string()),
                status: Some(status(2)),
                ..Default::default()
            }))
    }
}

pub fn status(id: u32) -> SandboxStatus {
    let description = match id {
        1 => "In Queue",
        2 => "Processing",
        3 => "Accepted",
        4 => "Wrong Answer",
        5 => "Time Limit Exceeded",
        6 => "Compilation Error",
        8 => "Memory Limit Exceeded",
        _ => "Runtime Error (NZEC)",
    };
    SandboxStatus {
        id,
        description: description.to_string(),
    }
}

pub fn report(status_id: u32, stdout: &str) -> ExecutionReport {
    ExecutionReport {
        stdout: stdout.to_string(),
        status: Some(status(status_id)),
        time: 0.05,
        memory: 2048,
        ..Default::default()
    }
}

/// Webhook body as the sandbox sends it, text fields base64 encoded
pub fn webhook_payload(token: &str, status_id: u32, stdout: &str) -> Value {
    let status = status(status_id);
    json!({
        "token": token,
        "stdout": STANDARD.encode(stdout),
        "stderr": null,
        "compile_output": null,
        "message": null,
        "status": { "id": status.id, "description": status.description },
        "time": "0.012",
        "memory": 3400
    })
}

/// Writes the case files of one problem, last case first
pub fn write_problem(root: &Path, problem_id: &str, cases: &[(&str, &str)]) {
    let inputs = root.join(problem_id).join("TestCases").join("Inputs");
    let outputs = root.join(problem_id).join("TestCases").join("Outputs");
    fs::create_dir_all(&inputs).unwrap();
    fs::create_dir_all(&outputs).unwrap();

    for (idx, (input, output)) in cases.iter().enumerate().rev() {
        let n = idx + 1;
        fs::write(inputs.join(format!("input{n}.txt")), format!("{input}\n")).unwrap();
        fs::write(outputs.join(format!("output{n}.txt")), format!("{output}\n")).unwrap();
    }
}

pub const CASES: [(&str, &str); 3] = [("1 2", "3"), ("10 20", "30"), ("-5 5", "0")];

pub struct Harness {
    pub config: Arc<Config>,
    pub sandbox: Arc<MockSandbox>,
    pub store: Arc<SubmissionStore>,
    pub tokens: Arc<TokenTable>,
    pub aggregator: Arc<Aggregator>,
    pub judge: Arc<Judge>,
    pub queue: Arc<JudgeQueue>,
    pub manager: Arc<SubmissionManager>,
    _dir: tempfile::TempDir,
}

/// Builds the full pipeline on a temporary database and problem folder.
///
/// `sandbox` is merged into the sandbox section of the configuration.
pub async fn harness(mock: MockSandbox, sandbox: Value) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let problems = dir.path().join("problems");
    write_problem(&problems, PROBLEM, &CASES);

    let mut sandbox_config = json!({ "url": "http://sandbox.invalid" });
    if let (Some(base), Some(extra)) = (sandbox_config.as_object_mut(), sandbox.as_object()) {
        base.extend(extra.clone());
    }
    let config: Config = serde_json::from_value(json!({
        "server": {},
        "sandbox": sandbox_config,
        "storage": { "root": problems.display().to_string() },
    }))
    .unwrap();

    let pool = db::init_db(dir.path().join("test.sqlite3")).await.unwrap();
    let sandbox = Arc::new(mock);
    let store = Arc::new(SubmissionStore::new(pool));
    let tokens = Arc::new(TokenTable::new());
    let aggregator = Arc::new(Aggregator::new(store.clone(), tokens.clone()));
    let config = Arc::new(config);
    let judge = Arc::new(Judge::new(
        store.clone(),
        aggregator.clone(),
        sandbox.clone(),
        Arc::new(FsTestCaseStore::new(problems)),
        config.clone(),
    ));
    let queue = Arc::new(JudgeQueue::new());
    let manager = Arc::new(SubmissionManager::new(store.clone(), queue.clone()));

    Harness {
        config,
        sandbox,
        store,
        tokens,
        aggregator,
        judge,
        queue,
        manager,
        _dir: dir,
    }
}

pub fn new_submission(user_id: &str, problem_id: &str) -> NewSubmission {
    NewSubmission {
        user_id: user_id.to_string(),
        problem_id: problem_id.to_string(),
        language: "python".to_string(),
        source_code: "a, b = map(int, input().split())\nprint(a + b)".to_string(),
    }
}

impl Harness {
    /// Creates a submission and takes it back off the queue
    pub async fn create(&self, problem_id: &str) -> SubmissionId {
        let submission = self
            .manager
            .submit(new_submission("alice", problem_id))
            .await
            .unwrap();
        assert_eq!(self.queue.pop().await, submission.id);
        submission.id
    }

    pub async fn get(&self, id: SubmissionId) -> Submission {
        self.store.get(id).await.unwrap().unwrap()
    }

    /// Waits until the submission reaches a verdict or `deadline` passes
    pub async fn wait_finished(&self, id: SubmissionId, deadline: Duration) -> Submission {
        let start = tokio::time::Instant::now();
        loop {
            let submission = self.get(id).await;
            if submission.status.is_terminal() || start.elapsed() > deadline {
                return submission;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
