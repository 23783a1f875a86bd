//! Concurrent HTTP GET load generator.
//!
//! This crate provides:
//! - A dispatcher that issues N GET requests through a W-wide admission gate
//! - A per-request lifecycle with timeout, redirect cap and body size cap
//! - A cool-down charged while the slot is held, which doubles as a rate limit
//! - Per-request reports (text or JSON lines) written atomically per request

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod report;
pub mod task;

pub use config::{ReportFormat, RunConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, DispatchError, TaskError};
pub use report::{ConsoleReporter, Reporter, ResponseSummary, SizeSource, TaskReport};
