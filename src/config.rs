//! Configuration loader and validator for the assembly runner.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::session::Credentials;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub shutdown: Shutdown,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Remote ERP connection and service account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    pub app_name: String,
    pub app_id: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Batching and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Queue {
    pub batch_size: usize,
    pub max_retries: i64,
    pub concurrency: usize,
    pub build_prefix: String,
    pub disassemble_prefix: String,
    pub retry_validation_failures: bool,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 1,
            concurrency: 1,
            build_prefix: "BLD".into(),
            disassemble_prefix: "DIS".into(),
            retry_validation_failures: false,
        }
    }
}

/// Unattended execution of deferred items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scheduler {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
        }
    }
}

/// Drain behaviour on termination signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Shutdown {
    pub drain_timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self {
            drain_timeout_seconds: 30,
            poll_interval_ms: 500,
        }
    }
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}/queue.db", self.app.data_dir.trim_end_matches('/'))
        })
    }

    /// Service account credentials, with `REMOTE_USERNAME`/`REMOTE_PASSWORD` overrides.
    pub fn service_credentials(&self) -> Credentials {
        Credentials {
            app_name: self.remote.app_name.clone(),
            app_id: self.remote.app_id.clone(),
            username: std::env::var("REMOTE_USERNAME")
                .unwrap_or_else(|_| self.remote.username.clone()),
            password: std::env::var("REMOTE_PASSWORD")
                .unwrap_or_else(|_| self.remote.password.clone()),
        }
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.drain_timeout_seconds)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown.poll_interval_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if reqwest::Url::parse(&cfg.remote.base_url).is_err() {
        return Err(ConfigError::Invalid("remote.base_url must be an absolute URL"));
    }
    if cfg.remote.app_name.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.app_name must be non-empty"));
    }
    if cfg.remote.app_id.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.app_id must be non-empty"));
    }
    if cfg.remote.username.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.username must be non-empty"));
    }
    if cfg.remote.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("remote.timeout_seconds must be > 0"));
    }

    let q = &cfg.queue;
    if q.batch_size == 0 {
        return Err(ConfigError::Invalid("queue.batch_size must be > 0"));
    }
    if !(0..=1).contains(&q.max_retries) {
        return Err(ConfigError::Invalid("queue.max_retries must be 0 or 1"));
    }
    if !(1..=8).contains(&q.concurrency) {
        return Err(ConfigError::Invalid("queue.concurrency must be between 1 and 8"));
    }
    if q.build_prefix.trim().is_empty() || q.disassemble_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid("queue prefixes must be non-empty"));
    }
    if q.build_prefix == q.disassemble_prefix {
        return Err(ConfigError::Invalid(
            "queue.build_prefix and queue.disassemble_prefix must differ",
        ));
    }
    if q.build_prefix.contains('|') || q.disassemble_prefix.contains('|') {
        return Err(ConfigError::Invalid("queue prefixes must not contain '|'"));
    }

    if cfg.scheduler.interval_seconds == 0 {
        return Err(ConfigError::Invalid("scheduler.interval_seconds must be > 0"));
    }
    if cfg.shutdown.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("shutdown.poll_interval_ms must be > 0"));
    }

    Ok(())
}

/// Example configuration with every section spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

remote:
  base_url: "http://localhost:28192/"
  app_name: "Assembly Runner"
  app_id: "7781"
  username: "svc-assembly"
  password: "CHANGE_ME"
  timeout_seconds: 60

queue:
  batch_size: 100
  max_retries: 1
  concurrency: 1
  build_prefix: "BLD"
  disassemble_prefix: "DIS"
  retry_validation_failures: false

scheduler:
  enabled: true
  interval_seconds: 300

shutdown:
  drain_timeout_seconds: 30
  poll_interval_ms: 500
"#
}
