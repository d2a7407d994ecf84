use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "judge-orchestrator", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of judging workers
    #[arg(long = "threads", short = 't', default_value_t = 2)]
    pub threads: u8,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_languages")]
    pub languages: Vec<LanguageConfig>,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub problems: Vec<ProblemLimits>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    #[default]
    Webhook,
    Poll,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SandboxConfig {
    /// Base URL of the execution service, e.g. `http://localhost:2358`
    pub url: String,
    /// Public base URL of this server, used to build the webhook callback
    pub callback_base_url: Option<String>,
    #[serde(default)]
    pub delivery: Delivery,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

pub const WEBHOOK_PATH: &str = "/webhooks/judge0";

impl SandboxConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            callback_base_url: None,
            delivery: Delivery::default(),
            probe_timeout_ms: default_probe_timeout_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            token_ttl_secs: default_token_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }

    /// Webhook URL handed to the sandbox; `None` in poll mode
    pub fn callback_url(&self) -> Option<String> {
        if self.delivery == Delivery::Poll {
            return None;
        }
        let base = self
            .callback_base_url
            .as_deref()
            .unwrap_or("http://localhost:12345");
        Some(format!("{}{}", base.trim_end_matches('/'), WEBHOOK_PATH))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_submit_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_poll_max_attempts() -> u32 {
    30
}

fn default_token_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "problems".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageConfig {
    pub name: String,
    pub id: u32,
}

/// Sandbox language id used when a submission names an unknown language
pub const FALLBACK_LANGUAGE_ID: u32 = 71;

fn default_languages() -> Vec<LanguageConfig> {
    [("C++", 54), ("Java", 62), ("JavaScript", 63), ("Python", FALLBACK_LANGUAGE_ID)]
        .into_iter()
        .map(|(name, id)| LanguageConfig {
            name: name.to_string(),
            id,
        })
        .collect()
}

pub fn language_id(languages: &[LanguageConfig], name: &str) -> u32 {
    languages
        .iter()
        .find(|l| l.name.eq_ignore_ascii_case(name))
        .map(|l| l.id)
        .unwrap_or(FALLBACK_LANGUAGE_ID)
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Seconds
    pub cpu_time_limit: f64,
    /// Seconds
    pub wall_time_limit: f64,
    /// Kilobytes
    pub memory_limit: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_limit: 5.0,
            wall_time_limit: 10.0,
            memory_limit: 128_000,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProblemLimits {
    pub id: String,
    pub cpu_time_limit: Option<f64>,
    pub wall_time_limit: Option<f64>,
    pub memory_limit: Option<u64>,
}

impl Config {
    /// Resource limits for a problem, falling back to the global defaults
    pub fn limits_for(&self, problem_id: &str) -> ResourceLimits {
        let base = self.limits;
        match self.problems.iter().find(|p| p.id == problem_id) {
            Some(p) => ResourceLimits {
                cpu_time_limit: p.cpu_time_limit.unwrap_or(base.cpu_time_limit),
                wall_time_limit: p.wall_time_limit.unwrap_or(base.wall_time_limit),
                memory_limit: p.memory_limit.unwrap_or(base.memory_limit),
            },
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let config: Config = serde_json::from_str(
            r#"{
                "server": { "bind_address": "127.0.0.1", "bind_port": 3001 },
                "sandbox": {
                    "url": "http://localhost:2358",
                    "callback_base_url": "http://judge.local:3001/"
                },
                "storage": { "root": "/srv/problems" },
                "problems": [ { "id": "FibonacciSequence", "cpu_time_limit": 2.0 } ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.server.bind_port, Some(3001));
        assert_eq!(config.sandbox.delivery, Delivery::Webhook);
        assert_eq!(config.sandbox.probe_timeout(), Duration::from_secs(3));
        assert_eq!(
            config.sandbox.callback_url().as_deref(),
            Some("http://judge.local:3001/webhooks/judge0")
        );
        assert_eq!(language_id(&config.languages, "C++"), 54);
        assert_eq!(language_id(&config.languages, "java"), 62);
        assert_eq!(language_id(&config.languages, "Brainfuck"), 71);

        let limits = config.limits_for("FibonacciSequence");
        assert_eq!(limits.cpu_time_limit, 2.0);
        assert_eq!(limits.memory_limit, 128_000);
        assert_eq!(config.limits_for("Other"), ResourceLimits::default());
    }

    #[test]
    fn test_poll_mode_has_no_callback() {
        let config: Config = serde_json::from_str(
            r#"{ "sandbox": { "url": "http://localhost:2358", "delivery": "poll" } }"#,
        )
        .unwrap();
        assert_eq!(config.sandbox.delivery, Delivery::Poll);
        assert_eq!(config.sandbox.callback_url(), None);
        assert_eq!(config.storage.root, "problems");
    }
}
