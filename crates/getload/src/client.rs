//! Per-task HTTP client construction and body draining.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Response, Url};
use tracing::debug;

use crate::config::RunConfig;
use crate::error::TaskError;

/// Connect timeout upper bound; the overall timeout still applies.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect targets visited by one request, in order.
///
/// The redirect policy runs inside reqwest, so hops are pushed through a
/// shared handle and read back once the request finishes.
#[derive(Debug, Clone, Default)]
pub struct RedirectTrail {
    hops: Arc<Mutex<Vec<Url>>>,
}

impl RedirectTrail {
    fn push(&self, url: Url) {
        if let Ok(mut hops) = self.hops.lock() {
            hops.push(url);
        }
    }

    /// Snapshot of the hops recorded so far.
    pub fn hops(&self) -> Vec<Url> {
        self.hops.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

/// Parse and check the target URL. Only absolute http(s) URLs with a host
/// are accepted.
pub fn parse_target(raw: &str) -> Result<Url, TaskError> {
    let url = Url::parse(raw).map_err(|e| TaskError::Construction(format!("{raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(TaskError::Construction(format!(
                "{raw:?}: unsupported scheme '{other}'"
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(TaskError::Construction(format!("{raw:?}: missing host")));
    }
    Ok(url)
}

/// Build the header map sent with every request of the run.
pub fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, TaskError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TaskError::Construction(format!("header name {name:?}: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| TaskError::Construction(format!("header {name} value: {e}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Build a client for a single task.
///
/// Each hop is recorded in `trail`; once more than `max_redirects` hops have
/// been followed the request fails with a redirect error.
pub fn build_client(
    config: &RunConfig,
    headers: HeaderMap,
    task: usize,
    trail: RedirectTrail,
) -> Result<Client, TaskError> {
    let max_redirects = config.max_redirects;
    let policy = redirect::Policy::custom(move |attempt| {
        // `previous` holds every URL requested so far, starting with the
        // original one, so its length is the number of hops including this one.
        if attempt.previous().len() > max_redirects {
            return attempt.error(format!("exceeded {max_redirects} redirects"));
        }
        debug!(task, to = %attempt.url(), "Following redirect");
        trail.push(attempt.url().clone());
        attempt.follow()
    });

    Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.timeout.min(MAX_CONNECT_TIMEOUT))
        .default_headers(headers)
        .redirect(policy)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| TaskError::Construction(format!("failed to create HTTP client: {e}")))
}

/// Map a reqwest failure onto the task error taxonomy.
pub fn classify_error(err: &reqwest::Error, config: &RunConfig) -> TaskError {
    if err.is_redirect() {
        TaskError::RedirectLimit(config.max_redirects)
    } else if err.is_timeout() {
        TaskError::Timeout(config.timeout)
    } else if err.is_builder() {
        TaskError::Construction(err.to_string())
    } else {
        TaskError::Transport(error_chain(err))
    }
}

/// Render an error with its sources, e.g. "error sending request: connection refused".
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Read and discard the body, stopping once `max_body_bytes` have been seen.
///
/// Returns the number of bytes counted, never more than the cap.
pub async fn drain_body(response: Response, config: &RunConfig) -> Result<u64, TaskError> {
    let limit = config.max_body_bytes;
    let mut stream = response.bytes_stream();
    let mut read = 0u64;

    while read < limit {
        let Some(chunk) = stream.next().await else {
            break;
        };
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                TaskError::Timeout(config.timeout)
            } else {
                TaskError::BodyRead(error_chain(&e))
            }
        })?;
        read = read.saturating_add(chunk.len() as u64).min(limit);
    }

    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_accepts_http_and_https() {
        assert!(parse_target("http://example.com/").is_ok());
        assert!(parse_target("https://example.com:8443/file.bin?x=1").is_ok());
    }

    #[test]
    fn test_parse_target_rejects_malformed() {
        for raw in ["", "example.com/file", "ftp://example.com/", "localhost:8080/x", "http://"] {
            match parse_target(raw) {
                Err(TaskError::Construction(_)) => {}
                other => panic!("{raw:?} should fail construction, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_build_headers() {
        let headers = build_headers(&[
            ("User-Agent".to_string(), "getload".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ])
        .unwrap();
        assert_eq!(headers.get("user-agent").unwrap(), "getload");
        assert_eq!(headers.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn test_build_headers_rejects_invalid() {
        assert!(matches!(
            build_headers(&[("Bad Name".to_string(), "x".to_string())]),
            Err(TaskError::Construction(_))
        ));
        assert!(matches!(
            build_headers(&[("X-Test".to_string(), "line\nbreak".to_string())]),
            Err(TaskError::Construction(_))
        ));
    }

    #[test]
    fn test_redirect_trail_records_hops() {
        let trail = RedirectTrail::default();
        let handle = trail.clone();
        handle.push(Url::parse("http://example.com/a").unwrap());
        handle.push(Url::parse("http://example.com/b").unwrap());
        let hops = trail.hops();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].path(), "/b");
    }
}
