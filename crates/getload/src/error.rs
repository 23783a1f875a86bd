//! Error types for the load generator.

use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a single request task.
///
/// None of these abort the run; each one is isolated to the task that hit it
/// and only shows up in that task's report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The request could not be built (bad URL, bad header, client setup).
    /// No network call was attempted.
    #[error("could not build request: {0}")]
    Construction(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("stopped after too many redirects (limit {0})")]
    RedirectLimit(usize),

    #[error("failed to read response body: {0}")]
    BodyRead(String),

    #[error("server returned status {status} (final url: {final_url})")]
    Status { status: u16, final_url: String },

    #[error("request cancelled")]
    Cancelled,
}

impl TaskError {
    /// Whether the task still pays its cool-down after failing this way.
    ///
    /// Construction failures never touched the network and cancelled tasks
    /// should wind down promptly, so both release their slot immediately.
    pub fn wants_cool_down(&self) -> bool {
        !matches!(self, TaskError::Construction(_) | TaskError::Cancelled)
    }
}

/// Invalid run configuration, detected before any task is launched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid header '{0}': expected 'Name: value'")]
    MalformedHeader(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Failure of the dispatcher itself, as opposed to an individual request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("concurrency gate closed while tasks were still pending")]
    GateClosed(#[from] tokio::sync::AcquireError),
}
