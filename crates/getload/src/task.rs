//! Lifecycle of a single request: build, send, drain, classify, cool down.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::client::{self, RedirectTrail};
use crate::config::RunConfig;
use crate::error::TaskError;
use crate::report::{Reporter, ResponseSummary, TaskReport};

/// State shared read-only by every task of a run.
pub struct TaskContext {
    pub config: RunConfig,
    pub reporter: Arc<dyn Reporter>,
    pub cancel: CancellationToken,
}

/// One GET against the target, identified by its ordinal.
pub struct RequestTask {
    index: usize,
    ctx: Arc<TaskContext>,
}

impl RequestTask {
    pub fn new(index: usize, ctx: Arc<TaskContext>) -> Self {
        Self { index, ctx }
    }

    /// Run the task to its terminal state while holding `permit`.
    ///
    /// The report is handed to the reporter before the cool-down; the slot is
    /// released only after it.
    #[instrument(name = "request", skip_all, fields(task = self.index + 1))]
    pub async fn run(self, permit: OwnedSemaphorePermit) {
        let trail = RedirectTrail::default();
        let outcome = self.execute(trail.clone()).await;

        let cool_down = match &outcome {
            Ok(_) => true,
            Err(e) => e.wants_cool_down(),
        };
        match &outcome {
            Ok(summary) => debug!(status = summary.status, elapsed = ?summary.elapsed, "Request succeeded"),
            Err(e) => debug!(error = %e, "Request failed"),
        }

        let report = TaskReport::new(self.index, trail.hops(), outcome);
        self.ctx.reporter.task_finished(&report);

        if cool_down {
            self.cool_down().await;
        }
        drop(permit);
    }

    async fn execute(&self, trail: RedirectTrail) -> Result<ResponseSummary, TaskError> {
        let config = &self.ctx.config;
        let start = Instant::now();

        let url = client::parse_target(&config.url)?;
        let headers = client::build_headers(&config.headers)?;
        let http = client::build_client(config, headers, self.index + 1, trail)?;

        let exchange = async {
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|e| client::classify_error(&e, config))?;

            let status = response.status();
            let final_url = response.url().clone();
            let content_length = parse_content_length(response.headers());
            let bytes_read = client::drain_body(response, config).await?;

            if !status.is_success() {
                return Err(TaskError::Status {
                    status: status.as_u16(),
                    final_url: final_url.to_string(),
                });
            }

            Ok::<_, TaskError>(ResponseSummary {
                status: status.as_u16(),
                final_url,
                elapsed: start.elapsed(),
                bytes_read,
                content_length,
            })
        };

        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(TaskError::Cancelled),
            result = exchange => result,
        }
    }

    /// Sleep for the configured rest, cut short by cancellation.
    async fn cool_down(&self) {
        let rest = self.ctx.config.rest;
        if rest.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(rest) => {}
        }
    }
}

/// `Content-Length` as a number, if present and parseable.
pub fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Collect(Mutex<Vec<TaskReport>>);

    impl Reporter for Collect {
        fn task_finished(&self, report: &TaskReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    #[test]
    fn test_parse_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_content_length(&headers), None);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1048576"));
        assert_eq!(parse_content_length(&headers), Some(1_048_576));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(parse_content_length(&headers), None);
    }

    #[tokio::test]
    async fn test_construction_failure_skips_cool_down() {
        let collect = Arc::new(Collect::default());
        let ctx = Arc::new(TaskContext {
            config: RunConfig {
                rest: Duration::from_secs(60),
                ..RunConfig::for_url("not a url")
            },
            reporter: collect.clone(),
            cancel: CancellationToken::new(),
        });
        let slots = Arc::new(Semaphore::new(1));
        let permit = slots.clone().acquire_owned().await.unwrap();

        let started = Instant::now();
        RequestTask::new(0, ctx).run(permit).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(slots.available_permits(), 1);
        let reports = collect.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].outcome, Err(TaskError::Construction(_))));
    }

    #[tokio::test]
    async fn test_bad_header_is_construction_failure() {
        let collect = Arc::new(Collect::default());
        let mut config = RunConfig::for_url("http://127.0.0.1:9/");
        config.headers.push(("Bad Header".to_string(), "x".to_string()));
        let ctx = Arc::new(TaskContext {
            config,
            reporter: collect.clone(),
            cancel: CancellationToken::new(),
        });
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();

        RequestTask::new(3, ctx).run(permit).await;

        let reports = collect.0.lock().unwrap();
        assert_eq!(reports[0].number(), 4);
        assert!(matches!(reports[0].outcome, Err(TaskError::Construction(_))));
    }
}
