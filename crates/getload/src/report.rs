//! Per-request reports and the console sink they are written to.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use tracing::warn;

use crate::config::{ReportFormat, RunConfig};
use crate::error::TaskError;

const MIB: f64 = 1024.0 * 1024.0;
const SEPARATOR: &str = "----------------------------------------";

/// Where the reported payload size came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSource {
    /// The response's `Content-Length` header.
    ContentLength,
    /// Bytes actually drained from the body.
    BytesRead,
}

/// Timing and size of a 2xx response.
#[derive(Debug, Clone)]
pub struct ResponseSummary {
    pub status: u16,
    /// URL after following redirects.
    pub final_url: Url,
    /// Time from task start until the body was drained.
    pub elapsed: Duration,
    pub bytes_read: u64,
    /// Parsed `Content-Length`, if the header was present and numeric.
    pub content_length: Option<u64>,
}

impl ResponseSummary {
    /// Payload size: `Content-Length` when known, bytes read otherwise.
    pub fn size_bytes(&self) -> u64 {
        self.content_length.unwrap_or(self.bytes_read)
    }

    pub fn size_source(&self) -> SizeSource {
        match self.content_length {
            Some(_) => SizeSource::ContentLength,
            None => SizeSource::BytesRead,
        }
    }

    pub fn size_mib(&self) -> f64 {
        self.size_bytes() as f64 / MIB
    }

    /// Throughput in MiB/s.
    pub fn throughput_mib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.size_mib() / secs
        } else {
            0.0
        }
    }
}

/// Terminal report of one request task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Zero-based ordinal of the task within the run.
    pub index: usize,
    /// Redirect targets followed, in order.
    pub redirects: Vec<Url>,
    pub outcome: Result<ResponseSummary, TaskError>,
    pub finished_at: DateTime<Utc>,
}

impl TaskReport {
    pub fn new(
        index: usize,
        redirects: Vec<Url>,
        outcome: Result<ResponseSummary, TaskError>,
    ) -> Self {
        Self {
            index,
            redirects,
            outcome,
            finished_at: Utc::now(),
        }
    }

    /// One-based number used in output.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Sink for run progress. Implementations must tolerate concurrent calls
/// from many tasks.
pub trait Reporter: Send + Sync {
    fn run_started(&self, _config: &RunConfig) {}

    fn task_finished(&self, report: &TaskReport);

    fn run_finished(&self) {}
}

/// Writes reports to a console stream, one whole block per write.
pub struct ConsoleReporter {
    format: ReportFormat,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleReporter {
    /// Reporter writing to standard output.
    pub fn stdout(format: ReportFormat) -> Self {
        Self::with_writer(format, io::stdout())
    }

    pub fn with_writer(format: ReportFormat, writer: impl Write + Send + 'static) -> Self {
        Self {
            format,
            out: Mutex::new(Box::new(writer)),
        }
    }

    fn emit(&self, block: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write report");
        }
    }
}

impl Reporter for ConsoleReporter {
    fn run_started(&self, config: &RunConfig) {
        let block = match self.format {
            ReportFormat::Text => format!(
                "starting {} requests, max concurrency: {}\n",
                config.requests, config.workers
            ),
            ReportFormat::Json => json_line(&serde_json::json!({
                "event": "run_started",
                "url": config.url,
                "requests": config.requests,
                "workers": config.workers,
                "rest_secs": config.rest.as_secs_f64(),
                "format": config.format,
            })),
        };
        self.emit(&block);
    }

    fn task_finished(&self, report: &TaskReport) {
        let block = match self.format {
            ReportFormat::Text => render_text(report),
            ReportFormat::Json => render_json(report),
        };
        self.emit(&block);
    }

    fn run_finished(&self) {
        let block = match self.format {
            ReportFormat::Text => "all requests completed\n".to_string(),
            ReportFormat::Json => json_line(&serde_json::json!({ "event": "run_finished" })),
        };
        self.emit(&block);
    }
}

/// Human-readable block for one task, separator line included.
pub fn render_text(report: &TaskReport) -> String {
    let n = report.number();
    let mut block = String::new();

    for hop in &report.redirects {
        let _ = writeln!(block, "request {n} redirected to: {hop}");
    }

    match &report.outcome {
        Ok(summary) => {
            let _ = writeln!(block, "request {n} succeeded, final url: {}", summary.final_url);
            let _ = writeln!(
                block,
                "elapsed {:.2} s, size: {:.2} MB, speed: {:.2} MB/s",
                summary.elapsed.as_secs_f64(),
                summary.size_mib(),
                summary.throughput_mib_per_sec()
            );
        }
        Err(TaskError::Status { status, .. }) => {
            let _ = writeln!(block, "request {n} failed, status: {status}");
        }
        Err(e) => {
            let _ = writeln!(block, "request {n} failed: {e}");
        }
    }

    block.push_str(SEPARATOR);
    block.push('\n');
    block
}

#[derive(Serialize)]
struct TaskRecord<'a> {
    event: &'static str,
    request: usize,
    finished_at: String,
    success: bool,
    redirects: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_source: Option<SizeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput_mib_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Single-line JSON record for one task.
pub fn render_json(report: &TaskReport) -> String {
    let mut record = TaskRecord {
        event: "request",
        request: report.number(),
        finished_at: report.finished_at.to_rfc3339(),
        success: report.is_success(),
        redirects: report.redirects.iter().map(Url::as_str).collect(),
        status: None,
        final_url: None,
        elapsed_secs: None,
        size_bytes: None,
        size_source: None,
        bytes_read: None,
        throughput_mib_s: None,
        error: None,
    };

    match &report.outcome {
        Ok(summary) => {
            record.status = Some(summary.status);
            record.final_url = Some(summary.final_url.as_str());
            record.elapsed_secs = Some(summary.elapsed.as_secs_f64());
            record.size_bytes = Some(summary.size_bytes());
            record.size_source = Some(summary.size_source());
            record.bytes_read = Some(summary.bytes_read);
            record.throughput_mib_s = Some(summary.throughput_mib_per_sec());
        }
        Err(e) => {
            if let TaskError::Status { status, final_url } = e {
                record.status = Some(*status);
                record.final_url = Some(final_url.as_str());
            }
            record.error = Some(e.to_string());
        }
    }

    json_line(&record)
}

fn json_line(value: &impl Serialize) -> String {
    match serde_json::to_string(value) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize report");
            String::new()
        }
    }
}
