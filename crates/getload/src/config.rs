//! Run configuration.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::error::ConfigError;

/// Browser-like User-Agent sent when none is given.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36 Edg/128.0.0.0";

/// Response bodies are drained up to this many bytes (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output format for per-request reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Text,
    /// One JSON object per request, one per line.
    Json,
}

/// Everything a run needs. Shared read-only across all request tasks.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target URL, kept as given. Each task parses it on its own so a bad
    /// URL fails every task instead of the whole run.
    pub url: String,
    /// Number of requests to issue.
    pub requests: usize,
    /// Maximum concurrently active requests.
    pub workers: usize,
    /// Request headers, applied in order. Includes the User-Agent.
    pub headers: Vec<(String, String)>,
    /// Cool-down each request pays before giving up its slot.
    pub rest: Duration,
    /// Whole-request timeout (connect, headers, body).
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: u64,
    pub format: ReportFormat,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            requests: 1,
            workers: 1,
            headers: vec![("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string())],
            rest: Duration::from_secs(1),
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            format: ReportFormat::Text,
        }
    }
}

impl RunConfig {
    /// Config for `url` with every other field at its default.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Coerce values the dispatcher cannot work with.
    ///
    /// A worker count of zero becomes one; counts above what the admission
    /// gate can hold are capped at `Semaphore::MAX_PERMITS`.
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    /// Set (or replace) the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("user-agent"));
        self.headers.push(("User-Agent".to_string(), user_agent.into()));
        self
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.as_str())
    }
}

/// Parse a `Name: value` header argument.
pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::MalformedHeader(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::MalformedHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_seconds(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        field,
        message: format!("{secs}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::for_url("http://example.com/");
        assert_eq!(config.requests, 1);
        assert_eq!(config.workers, 1);
        assert_eq!(config.rest, Duration::from_secs(1));
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.max_body_bytes, 10_485_760);
        assert_eq!(config.user_agent(), Some(DEFAULT_USER_AGENT));
    }

    #[test]
    fn test_zero_workers_coerced_to_one() {
        let config = RunConfig {
            workers: 0,
            ..RunConfig::for_url("http://example.com/")
        }
        .normalized();
        assert_eq!(config.workers, 1);

        let config = RunConfig {
            workers: 8,
            ..RunConfig::default()
        }
        .normalized();
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_huge_workers_capped_at_gate_size() {
        let config = RunConfig {
            workers: usize::MAX,
            ..RunConfig::default()
        }
        .normalized();
        assert_eq!(config.workers, Semaphore::MAX_PERMITS);
        // The gate accepts the capped count
        let _ = Semaphore::new(config.workers);
    }

    #[test]
    fn test_with_user_agent_replaces_existing() {
        let config = RunConfig::default().with_user_agent("getload-test/1.0");
        let agents: Vec<_> = config
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .collect();
        assert_eq!(agents.len(), 1);
        assert_eq!(config.user_agent(), Some("getload-test/1.0"));
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept: text/html").unwrap(),
            ("Accept".to_string(), "text/html".to_string())
        );
        // Only the first colon separates name from value
        assert_eq!(
            parse_header("X-Forwarded-For:  http://a:b ").unwrap(),
            ("X-Forwarded-For".to_string(), "http://a:b".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("rest", 0.25).unwrap(), Duration::from_millis(250));
        assert_eq!(parse_seconds("rest", 0.0).unwrap(), Duration::ZERO);
        assert!(parse_seconds("rest", -1.0).is_err());
        assert!(parse_seconds("timeout", f64::NAN).is_err());
    }
}
