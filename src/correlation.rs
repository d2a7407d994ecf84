use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::sandbox::ExecutionReport;
use crate::submission::SubmissionId;
use crate::testcases::TestCase;

/// Where a sandbox token's result belongs
#[derive(Debug, Clone)]
pub struct Correlation {
    pub submission_id: SubmissionId,
    pub test_case: u32,
    pub case: TestCase,
    pub registered_at: Instant,
}

/// How long a result for a not yet registered token is kept
pub const HOLD_TTL: Duration = Duration::from_secs(60);

struct Held {
    report: ExecutionReport,
    received_at: Instant,
}

#[derive(Default)]
struct Tables {
    entries: HashMap<String, Correlation>,
    held: HashMap<String, Held>,
}

/// Maps sandbox tokens to the test case they were dispatched for.
///
/// An entry is removed by whichever path consumes it first (webhook, poll,
/// or expiry), so every token is aggregated at most once.
///
/// A fast sandbox can report before `submit` has even returned the token.
/// Such results are held for [`HOLD_TTL`] and handed out by
/// [`TokenTable::register`] instead of creating an entry.
pub struct TokenTable {
    tables: Mutex<Tables>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Records where `token` belongs.
    ///
    /// Returns the entry together with the held result if the sandbox already
    /// reported this token; nothing is stored in that case.
    #[must_use]
    pub fn register(
        &self,
        token: impl Into<String>,
        submission_id: SubmissionId,
        test_case: u32,
        case: TestCase,
    ) -> Option<(Correlation, ExecutionReport)> {
        let token = token.into();
        let entry = Correlation {
            submission_id,
            test_case,
            case,
            registered_at: Instant::now(),
        };

        let mut tables = self.tables.lock();
        if let Some(held) = tables.held.remove(&token) {
            log::info!("Token {token} reported before registration, submission {submission_id}");
            return Some((entry, held.report));
        }

        log::debug!(
            "Registered token {token} -> submission {submission_id}, test case {test_case}"
        );
        tables.entries.insert(token, entry);
        None
    }

    /// Removes and returns the entry; `None` if unknown or already consumed
    pub fn take(&self, token: &str) -> Option<Correlation> {
        self.tables.lock().entries.remove(token)
    }

    /// Like [`TokenTable::take`], but an unknown token keeps `report` until
    /// it is registered or [`HOLD_TTL`] passes
    pub fn take_or_hold(
        &self,
        token: &str,
        report: ExecutionReport,
    ) -> Option<(Correlation, ExecutionReport)> {
        let mut tables = self.tables.lock();
        if let Some(entry) = tables.entries.remove(token) {
            return Some((entry, report));
        }

        let now = Instant::now();
        tables
            .held
            .retain(|_, held| now.duration_since(held.received_at) < HOLD_TTL);
        tables.held.insert(
            token.to_string(),
            Held {
                report,
                received_at: now,
            },
        );
        None
    }

    /// Puts back an entry that was taken but could not be processed
    pub fn restore(&self, token: impl Into<String>, entry: Correlation) {
        self.tables.lock().entries.insert(token.into(), entry);
    }

    /// Removes every entry registered more than `ttl` ago
    pub fn take_expired(&self, ttl: Duration) -> Vec<(String, Correlation)> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        tables
            .held
            .retain(|_, held| now.duration_since(held.received_at) < HOLD_TTL);

        let expired: Vec<String> = tables
            .entries
            .iter()
            .filter(|(_, c)| now.duration_since(c.registered_at) >= ttl)
            .map(|(token, _)| token.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|token| tables.entries.remove(&token).map(|c| (token, c)))
            .collect()
    }

    /// Number of registered tokens still waiting for a result
    pub fn len(&self) -> usize {
        self.tables.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of results waiting for their token to be registered
    pub fn held(&self) -> usize {
        self.tables.lock().held.len()
    }
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case() -> TestCase {
        TestCase {
            input: "1".to_string(),
            expected_output: "1".to_string(),
        }
    }

    #[test]
    fn test_take_consumes_exactly_once() {
        let table = TokenTable::new();
        assert!(table.register("tok", 4, 2, case()).is_none());

        let entry = table.take("tok").unwrap();
        assert_eq!((entry.submission_id, entry.test_case), (4, 2));
        assert!(table.take("tok").is_none());
        assert!(table.take("other").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_take_expired() {
        let table = TokenTable::new();
        assert!(table.register("old", 1, 1, case()).is_none());
        std::thread::sleep(Duration::from_millis(20));
        assert!(table.register("new", 1, 2, case()).is_none());

        let expired = table.take_expired(Duration::from_millis(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "old");
        assert_eq!(table.len(), 1);
        assert!(table.take_expired(Duration::from_secs(60)).is_empty());
        assert!(table.take("new").is_some());
    }

    #[test]
    fn test_early_result_is_handed_to_register() {
        let table = TokenTable::new();
        let report = ExecutionReport {
            stdout: "1".to_string(),
            ..Default::default()
        };

        assert!(table.take_or_hold("fast", report.clone()).is_none());
        assert_eq!(table.held(), 1);
        assert!(table.is_empty());

        let (entry, held) = table.register("fast", 7, 3, case()).unwrap();
        assert_eq!((entry.submission_id, entry.test_case), (7, 3));
        assert_eq!(held, report);
        assert_eq!(table.held(), 0);
        assert!(table.is_empty());
        assert!(table.take("fast").is_none());
    }

    #[test]
    fn test_take_or_hold_prefers_registered_entry() {
        let table = TokenTable::new();
        assert!(table.register("tok", 1, 1, case()).is_none());

        let (entry, _) = table
            .take_or_hold("tok", ExecutionReport::default())
            .unwrap();
        assert_eq!(entry.submission_id, 1);
        assert_eq!(table.held(), 0);
        assert!(table.is_empty());
    }
}
