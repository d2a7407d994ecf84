use std::fs;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::submission::{NewSubmission, Submission, SubmissionId, SubmissionStatus, TestResult};

const DATABASE_NAME: &str = "judge-orchestrator.sqlite3";

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "judge-orchestrator").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    // rwc = read/write/create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id                 INTEGER  PRIMARY KEY AUTOINCREMENT,
            user_id            TEXT     NOT NULL,
            problem_id         TEXT     NOT NULL,
            language           TEXT     NOT NULL,
            source_code        TEXT     NOT NULL,
            status             TEXT     NOT NULL,
            total_test_cases   INTEGER  NOT NULL DEFAULT 0,
            passed_test_cases  INTEGER  NOT NULL DEFAULT 0,
            execution_time     REAL     NOT NULL DEFAULT 0,
            memory_used        INTEGER  NOT NULL DEFAULT 0,
            error_message      TEXT,
            created_at         TEXT     NOT NULL,
            updated_at         TEXT     NOT NULL
        );",
        "CREATE INDEX IF NOT EXISTS idx_submissions_user ON submissions(user_id, created_at);",
        r"
        CREATE TABLE IF NOT EXISTS test_results (
            submission_id       INTEGER  NOT NULL,
            test_case           INTEGER  NOT NULL,
            input               TEXT     NOT NULL,
            expected_output     TEXT     NOT NULL,
            actual_output       TEXT     NOT NULL,
            status              TEXT     NOT NULL,
            execution_time      REAL     NOT NULL,
            memory_used         INTEGER  NOT NULL,
            error               TEXT,
            raw_sandbox_status  TEXT     NOT NULL,
            PRIMARY KEY (submission_id, test_case),
            FOREIGN KEY (submission_id)  REFERENCES submissions (id)
        );",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    user_id: String,
    problem_id: String,
    language: String,
    source_code: String,
    status: String,
    total_test_cases: i64,
    passed_test_cases: i64,
    execution_time: f64,
    memory_used: i64,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct TestResultRow {
    test_case: i64,
    input: String,
    expected_output: String,
    actual_output: String,
    status: String,
    execution_time: f64,
    memory_used: i64,
    error: Option<String>,
    raw_sandbox_status: String,
}

impl SubmissionRow {
    fn into_submission(self, test_results: Vec<TestResult>) -> sqlx::Result<Submission> {
        let status = self
            .status
            .parse::<SubmissionStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(Submission {
            id: self.id,
            user_id: self.user_id,
            problem_id: self.problem_id,
            language: self.language,
            source_code: self.source_code,
            status,
            test_results,
            total_test_cases: self.total_test_cases as u32,
            passed_test_cases: self.passed_test_cases as u32,
            execution_time: self.execution_time,
            memory_used: self.memory_used,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<TestResultRow> for TestResult {
    type Error = sqlx::Error;

    fn try_from(row: TestResultRow) -> sqlx::Result<Self> {
        Ok(TestResult {
            test_case: row.test_case as u32,
            input: row.input,
            expected_output: row.expected_output,
            actual_output: row.actual_output,
            status: row.status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            execution_time: row.execution_time,
            memory_used: row.memory_used,
            error: row.error,
            raw_sandbox_status: row.raw_sandbox_status,
        })
    }
}

/// Inserts a new submission in `Processing` with no results and zero counters
pub async fn create_submission(
    pool: &SqlitePool,
    body: &NewSubmission,
) -> sqlx::Result<Submission> {
    let now = crate::create_timestamp();
    let status = SubmissionStatus::Processing.to_string();

    let id = sqlx::query(
        r#"
        INSERT INTO submissions (user_id, problem_id, language, source_code, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&body.user_id)
    .bind(&body.problem_id)
    .bind(&body.language)
    .bind(&body.source_code)
    .bind(&status)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(Submission {
        id,
        user_id: body.user_id.clone(),
        problem_id: body.problem_id.clone(),
        language: body.language.clone(),
        source_code: body.source_code.clone(),
        status: SubmissionStatus::Processing,
        test_results: Vec::new(),
        total_test_cases: 0,
        passed_test_cases: 0,
        execution_time: 0.0,
        memory_used: 0,
        error_message: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

async fn fetch_test_results(pool: &SqlitePool, id: SubmissionId) -> sqlx::Result<Vec<TestResult>> {
    let rows = sqlx::query_as::<_, TestResultRow>(
        r#"
        SELECT test_case, input, expected_output, actual_output, status,
               execution_time, memory_used, error, raw_sandbox_status
        FROM test_results
        WHERE submission_id = ?
        ORDER BY test_case
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TestResult::try_from).collect()
}

/// Returns `None` when no submission has the given id
pub async fn fetch_submission(
    pool: &SqlitePool,
    id: SubmissionId,
) -> sqlx::Result<Option<Submission>> {
    log::debug!("Trying to fetch submission {id} from database");

    let row = sqlx::query_as::<_, SubmissionRow>(
        r#"
        SELECT id, user_id, problem_id, language, source_code, status, total_test_cases,
               passed_test_cases, execution_time, memory_used, error_message, created_at, updated_at
        FROM submissions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let results = fetch_test_results(pool, id).await?;
            row.into_submission(results).map(Some)
        }
        None => Ok(None),
    }
}

/// All submissions of one user, newest first
pub async fn fetch_submissions_by_user(
    pool: &SqlitePool,
    user_id: &str,
) -> sqlx::Result<Vec<Submission>> {
    let rows = sqlx::query_as::<_, SubmissionRow>(
        r#"
        SELECT id, user_id, problem_id, language, source_code, status, total_test_cases,
               passed_test_cases, execution_time, memory_used, error_message, created_at, updated_at
        FROM submissions
        WHERE user_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut submissions = Vec::with_capacity(rows.len());
    for row in rows {
        let results = fetch_test_results(pool, row.id).await?;
        submissions.push(row.into_submission(results)?);
    }

    Ok(submissions)
}

/// Writes back every mutable column of a submission and replaces its results
pub async fn save_submission(pool: &SqlitePool, submission: &Submission) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, total_test_cases = ?, passed_test_cases = ?, execution_time = ?,
            memory_used = ?, error_message = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(submission.status.to_string())
    .bind(submission.total_test_cases as i64)
    .bind(submission.passed_test_cases as i64)
    .bind(submission.execution_time)
    .bind(submission.memory_used)
    .bind(&submission.error_message)
    .bind(&submission.updated_at)
    .bind(submission.id)
    .execute(tx.as_mut())
    .await?;

    sqlx::query("DELETE FROM test_results WHERE submission_id = ?")
        .bind(submission.id)
        .execute(tx.as_mut())
        .await?;

    for result in &submission.test_results {
        sqlx::query(
            r#"
            INSERT INTO test_results (submission_id, test_case, input, expected_output, actual_output,
                                      status, execution_time, memory_used, error, raw_sandbox_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(submission.id)
        .bind(result.test_case as i64)
        .bind(&result.input)
        .bind(&result.expected_output)
        .bind(&result.actual_output)
        .bind(result.status.as_str())
        .bind(result.execution_time)
        .bind(result.memory_used)
        .bind(&result.error)
        .bind(&result.raw_sandbox_status)
        .execute(tx.as_mut())
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Ids and statuses of every submission that has not reached a verdict
pub async fn fetch_unfinished(
    pool: &SqlitePool,
) -> sqlx::Result<Vec<(SubmissionId, SubmissionStatus)>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT id, status FROM submissions
        WHERE status IN ('Processing', 'Running') OR status LIKE 'Testing case %'
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, status)| {
            status
                .parse()
                .map(|status| (id, status))
                .map_err(|e: String| sqlx::Error::Decode(e.into()))
        })
        .collect()
}
