use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::SandboxError;
use crate::config::ResourceLimits;
use crate::testcases::TestCase;

/// Sandbox status ids at or below this value mean "queued" or "processing"
const LAST_PENDING_STATUS: u32 = 2;

/// Request body of `POST /submissions`; text fields are base64 encoded
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SandboxJob {
    pub language_id: u32,
    pub source_code: String,
    pub stdin: String,
    pub expected_output: String,
    pub cpu_time_limit: f64,
    pub memory_limit: u64,
    pub wall_time_limit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl SandboxJob {
    pub fn encode(
        language_id: u32,
        source_code: &str,
        case: &TestCase,
        limits: ResourceLimits,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            language_id,
            source_code: STANDARD.encode(source_code),
            stdin: STANDARD.encode(&case.input),
            expected_output: STANDARD.encode(&case.expected_output),
            cpu_time_limit: limits.cpu_time_limit,
            memory_limit: limits.memory_limit,
            wall_time_limit: limits.wall_time_limit,
            callback_url,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SandboxStatus {
    pub id: u32,
    #[serde(default)]
    pub description: String,
}

/// A job result as the sandbox sends it, either through the webhook or a poll
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SandboxReport {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub compile_output: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<SandboxStatus>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub time: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub memory: Option<i64>,
}

/// A [`SandboxReport`] with its base64 fields decoded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionReport {
    pub stdout: String,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub message: Option<String>,
    pub status: Option<SandboxStatus>,
    /// Seconds
    pub time: f64,
    /// Kilobytes
    pub memory: i64,
}

impl SandboxReport {
    pub fn is_terminal(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.id > LAST_PENDING_STATUS)
    }

    pub fn decode(self) -> Result<ExecutionReport, SandboxError> {
        Ok(ExecutionReport {
            stdout: decode_field("stdout", self.stdout)?.unwrap_or_default(),
            stderr: decode_field("stderr", self.stderr)?,
            compile_output: decode_field("compile_output", self.compile_output)?,
            message: decode_field("message", self.message)?,
            status: self.status,
            time: self.time.unwrap_or(0.0),
            memory: self.memory.unwrap_or(0),
        })
    }
}

impl ExecutionReport {
    /// First non-empty diagnostic among stderr, compile output and message
    pub fn diagnostic(&self) -> Option<String> {
        [&self.stderr, &self.compile_output, &self.message]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
    }
}

fn decode_field(name: &str, value: Option<String>) -> Result<Option<String>, SandboxError> {
    let Some(value) = value else {
        return Ok(None);
    };
    // The sandbox wraps long base64 output across lines
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| SandboxError::Decode(format!("{name}: {e}")))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_encoding() {
        let case = TestCase {
            input: "1 2".to_string(),
            expected_output: "3".to_string(),
        };
        let job = SandboxJob::encode(
            71,
            "print(3)",
            &case,
            ResourceLimits::default(),
            Some("http://judge/webhooks/judge0".to_string()),
        );

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["source_code"], "cHJpbnQoMyk=");
        assert_eq!(json["stdin"], "MSAy");
        assert_eq!(json["expected_output"], "Mw==");
        assert_eq!(json["memory_limit"], 128000);
        assert_eq!(json["callback_url"], "http://judge/webhooks/judge0");

        let job = SandboxJob::encode(71, "", &case, ResourceLimits::default(), None);
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("callback_url").is_none());
    }

    #[test]
    fn test_report_decoding() {
        let report: SandboxReport = serde_json::from_str(
            r#"{
                "token": "abc",
                "stdout": "Mw\no=",
                "stderr": null,
                "compile_output": "",
                "message": "c2VnZmF1bHQ=",
                "status": { "id": 3, "description": "Accepted" },
                "time": "0.012",
                "memory": 3420
            }"#,
        )
        .unwrap();
        assert!(report.is_terminal());

        let decoded = report.decode().unwrap();
        assert_eq!(decoded.stdout, "3\n");
        assert_eq!(decoded.stderr, None);
        assert_eq!(decoded.compile_output.as_deref(), Some(""));
        assert_eq!(decoded.diagnostic().as_deref(), Some("segfault"));
        assert_eq!(decoded.time, 0.012);
        assert_eq!(decoded.memory, 3420);
    }

    #[test]
    fn test_pending_and_malformed_reports() {
        let pending: SandboxReport =
            serde_json::from_str(r#"{ "status": { "id": 2, "description": "Processing" } }"#)
                .unwrap();
        assert!(!pending.is_terminal());
        assert!(!SandboxReport::default().is_terminal());

        let broken = SandboxReport {
            stdout: Some("%%%".to_string()),
            ..Default::default()
        };
        assert!(matches!(broken.decode(), Err(SandboxError::Decode(_))));
    }
}
