use std::time::Duration;

use kbingest_core::files::BYTES_PER_MB;
use kbingest_core::job::{JobSettings, DEFAULT_BATCH_SIZE};

/// An environment variable held a value that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be {expected}, got {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Queue configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend running locally.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Base URL of the ingestion backend.
    pub api_url: String,
    /// Polling fallback interval (default: 2 s).
    pub poll_interval: Duration,
    /// Timeout for status, list and cancel requests. Uploads and the live
    /// feed are not bounded by it.
    pub request_timeout: Duration,
    /// Accepted for compatibility; jobs are always processed one at a time.
    pub concurrent_jobs: usize,
    pub preserve_structure: bool,
    pub skip_unsupported: bool,
    pub max_file_size_mb: u64,
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
            concurrent_jobs: 1,
            preserve_structure: true,
            skip_unsupported: true,
            max_file_size_mb: 500,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                 |
    /// |-------------------------------|-------------------------|
    /// | `INGEST_API_URL`              | `http://localhost:8000` |
    /// | `INGEST_POLL_INTERVAL_MS`     | `2000`                  |
    /// | `INGEST_REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `INGEST_CONCURRENT_JOBS`      | `1`                     |
    /// | `INGEST_PRESERVE_STRUCTURE`   | `true`                  |
    /// | `INGEST_SKIP_UNSUPPORTED`     | `true`                  |
    /// | `INGEST_MAX_FILE_SIZE_MB`     | `500`                   |
    /// | `INGEST_BATCH_SIZE`           | `100`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("INGEST_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.api_url);

        let poll_interval_ms: u64 =
            parse_var(&lookup, "INGEST_POLL_INTERVAL_MS", 2000, "a positive integer")?;
        let request_timeout_secs: u64 =
            parse_var(&lookup, "INGEST_REQUEST_TIMEOUT_SECS", 30, "a positive integer")?;
        let concurrent_jobs: usize =
            parse_var(&lookup, "INGEST_CONCURRENT_JOBS", 1, "a positive integer")?;
        let preserve_structure: bool =
            parse_var(&lookup, "INGEST_PRESERVE_STRUCTURE", true, "true or false")?;
        let skip_unsupported: bool =
            parse_var(&lookup, "INGEST_SKIP_UNSUPPORTED", true, "true or false")?;
        let max_file_size_mb: u64 =
            parse_var(&lookup, "INGEST_MAX_FILE_SIZE_MB", 500, "a positive integer")?;
        let batch_size: usize =
            parse_var(&lookup, "INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE, "a positive integer")?;

        for (var, value) in [
            ("INGEST_POLL_INTERVAL_MS", poll_interval_ms),
            ("INGEST_MAX_FILE_SIZE_MB", max_file_size_mb),
            ("INGEST_BATCH_SIZE", batch_size as u64),
            ("INGEST_CONCURRENT_JOBS", concurrent_jobs as u64),
        ] {
            if value == 0 {
                return Err(ConfigError {
                    var,
                    value: "0".into(),
                    expected: "a positive integer",
                });
            }
        }

        Ok(Self {
            api_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
            concurrent_jobs,
            preserve_structure,
            skip_unsupported,
            max_file_size_mb,
            batch_size,
        })
    }

    /// Settings applied to jobs enqueued without explicit settings.
    pub fn default_settings(&self) -> JobSettings {
        JobSettings {
            preserve_structure: self.preserve_structure,
            skip_unsupported: self.skip_unsupported,
            max_file_size_bytes: self.max_file_size_mb.saturating_mul(BYTES_PER_MB),
            batch_size: self.batch_size,
        }
    }
}

fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError {
            var,
            value: raw,
            expected,
        }),
    }
}
