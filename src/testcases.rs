use std::cmp::Ordering;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// One (input, expected output) pair, already trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFileKind {
    Input,
    Output,
}

impl CaseFileKind {
    fn infix(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    fn folder(&self) -> &'static str {
        match self {
            Self::Input => "Inputs",
            Self::Output => "Outputs",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TestCaseError {
    #[error("No test cases found for problem {problem_id}: {detail}")]
    NoTestCases { problem_id: String, detail: String },
    #[error("Failed to read test case files from storage: {0}")]
    Storage(#[from] io::Error),
}

/// Read-only access to the two parallel file collections of a problem
#[async_trait]
pub trait TestCaseStore: Send + Sync {
    async fn list(&self, problem_id: &str, kind: CaseFileKind) -> io::Result<Vec<String>>;

    async fn download(&self, problem_id: &str, kind: CaseFileKind, name: &str)
    -> io::Result<String>;
}

/// Test cases laid out as `<root>/<problem>/TestCases/{Inputs,Outputs}/<file>`
pub struct FsTestCaseStore {
    root: PathBuf,
}

impl FsTestCaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder(&self, problem_id: &str, kind: CaseFileKind) -> io::Result<PathBuf> {
        if problem_id.is_empty()
            || problem_id.contains(['/', '\\'])
            || Path::new(problem_id)
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid problem id: {problem_id}"),
            ));
        }

        Ok(self
            .root
            .join(problem_id)
            .join("TestCases")
            .join(kind.folder()))
    }
}

#[async_trait]
impl TestCaseStore for FsTestCaseStore {
    async fn list(&self, problem_id: &str, kind: CaseFileKind) -> io::Result<Vec<String>> {
        let folder = self.folder(problem_id, kind)?;
        let mut entries = match tokio::fs::read_dir(&folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }

        Ok(names)
    }

    async fn download(
        &self,
        problem_id: &str,
        kind: CaseFileKind,
        name: &str,
    ) -> io::Result<String> {
        let path = self.folder(problem_id, kind)?.join(name);
        tokio::fs::read_to_string(path).await
    }
}

/// Loads every test case of a problem in stable ordinal order.
///
/// Files are paired by removing the `input`/`output` infix from their names
/// and ordered by [`natural_cmp`] on the input file name.
pub async fn load_test_cases(
    store: &dyn TestCaseStore,
    problem_id: &str,
) -> Result<Vec<TestCase>, TestCaseError> {
    let mut inputs = store.list(problem_id, CaseFileKind::Input).await?;
    let outputs = store.list(problem_id, CaseFileKind::Output).await?;
    inputs.sort_by(|a, b| natural_cmp(a, b));

    let pairs = pair_files(&inputs, &outputs);

    if pairs.is_empty() {
        return Err(TestCaseError::NoTestCases {
            problem_id: problem_id.to_string(),
            detail: format!(
                "{} input and {} output files, none paired",
                inputs.len(),
                outputs.len()
            ),
        });
    }
    if pairs.len() != inputs.len() || pairs.len() != outputs.len() {
        return Err(TestCaseError::NoTestCases {
            problem_id: problem_id.to_string(),
            detail: format!(
                "{} input and {} output files but only {} pairs",
                inputs.len(),
                outputs.len(),
                pairs.len()
            ),
        });
    }

    let mut cases = Vec::with_capacity(pairs.len());
    for (input_name, output_name) in pairs {
        let input = store
            .download(problem_id, CaseFileKind::Input, input_name)
            .await?;
        let expected_output = store
            .download(problem_id, CaseFileKind::Output, output_name)
            .await?;
        cases.push(TestCase {
            input: input.trim().to_string(),
            expected_output: expected_output.trim().to_string(),
        });
    }

    log::debug!("Loaded {} test cases for problem {problem_id}", cases.len());
    Ok(cases)
}

fn pairing_key(name: &str, kind: CaseFileKind) -> String {
    name.replacen(kind.infix(), "", 1)
}

/// Pairs input and output names, keeping the order of `inputs`
fn pair_files<'a>(inputs: &'a [String], outputs: &'a [String]) -> Vec<(&'a str, &'a str)> {
    let by_key: HashMap<String, &str> = outputs
        .iter()
        .map(|name| (pairing_key(name, CaseFileKind::Output), name.as_str()))
        .collect();

    inputs
        .iter()
        .filter_map(|input| {
            by_key
                .get(&pairing_key(input, CaseFileKind::Input))
                .map(|output| (input.as_str(), *output))
        })
        .collect()
}

/// Splits a string into maximal runs of ASCII digits and non-digits
fn chunks(s: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut in_digits = None;

    for (idx, ch) in s.char_indices() {
        let is_digit = ch.is_ascii_digit();
        if in_digits.is_some_and(|d| d != is_digit) {
            chunks.push(&s[start..idx]);
            start = idx;
        }
        in_digits = Some(is_digit);
    }
    if start < s.len() {
        chunks.push(&s[start..]);
    }

    chunks
}

/// Numeric-aware string ordering: `case2` sorts before `case10`
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a_chunks, b_chunks) = (chunks(a), chunks(b));

    for (x, y) in a_chunks.iter().zip(b_chunks.iter()) {
        let is_digit = |c: char| c.is_ascii_digit();
        let both_numeric = x.starts_with(is_digit) && y.starts_with(is_digit);

        let ordering = if both_numeric {
            let (xt, yt) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
            xt.len()
                .cmp(&yt.len())
                .then_with(|| xt.cmp(yt))
                .then_with(|| x.len().cmp(&y.len()))
        } else {
            x.cmp(y)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a_chunks.len().cmp(&b_chunks.len())
}
