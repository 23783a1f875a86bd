//! getload CLI: fire N concurrent GET requests at one URL.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use getload::config::{self, ReportFormat, RunConfig};
use getload::{ConsoleReporter, Dispatcher};

#[derive(Parser, Debug)]
#[command(name = "getload")]
#[command(about = "Issue concurrent HTTP GET requests and report timing, size and throughput")]
struct Args {
    /// Target URL
    url: String,

    /// Number of requests to issue
    #[arg(short = 't', long, default_value = "1")]
    times: usize,

    /// Maximum concurrent requests (values below 1 mean 1)
    #[arg(short, long, default_value = "1", allow_negative_numbers = true)]
    workers: i64,

    /// User-Agent header value
    #[arg(short = 'u', long = "ua", default_value = config::DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Seconds each request rests after finishing, before freeing its slot
    #[arg(short, long, default_value = "1", allow_negative_numbers = true)]
    rest: f64,

    /// Extra request header as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30", allow_negative_numbers = true)]
    timeout: f64,

    /// Maximum redirects to follow
    #[arg(long, default_value_t = config::DEFAULT_MAX_REDIRECTS)]
    max_redirects: usize,

    /// Maximum response body bytes to read
    #[arg(long, default_value_t = config::DEFAULT_MAX_BODY_BYTES)]
    max_body: u64,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,

    /// Log level for diagnostics on stderr
    #[arg(
        long,
        default_value = "warn",
        value_parser = ["trace", "debug", "info", "warn", "error"],
        ignore_case = true
    )]
    log_level: String,

    /// Emit diagnostics as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> Result<RunConfig> {
        let mut config = RunConfig {
            url: self.url,
            requests: self.times,
            workers: usize::try_from(self.workers).unwrap_or(0),
            rest: config::parse_seconds("rest", self.rest)?,
            timeout: config::parse_seconds("timeout", self.timeout)?,
            max_redirects: self.max_redirects,
            max_body_bytes: self.max_body,
            format: self.format,
            ..RunConfig::default()
        }
        .with_user_agent(self.user_agent);

        for raw in &self.headers {
            config.headers.push(config::parse_header(raw)?);
        }

        Ok(config.normalized())
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json)?;

    let config = args.into_config()?;
    let reporter = Arc::new(ConsoleReporter::stdout(config.format));

    // Ctrl+C aborts in-flight requests; every task still reports and frees its slot.
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling outstanding requests");
            cancel_on_signal.cancel();
        }
    });

    Dispatcher::with_cancellation(config, reporter, cancel)
        .run()
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("getload").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_missing_url_is_usage_error() {
        assert!(Args::try_parse_from(["getload", "-t", "3"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["http://example.com/"]).into_config().unwrap();
        assert_eq!(config.requests, 1);
        assert_eq!(config.workers, 1);
        assert_eq!(config.rest, Duration::from_secs(1));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.user_agent(), Some(config::DEFAULT_USER_AGENT));
        assert_eq!(config.format, ReportFormat::Text);
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "-t", "20", "-w", "4", "--ua", "probe/1.0", "-r", "0.5", "-H", "Accept: */*",
            "--format", "json", "https://example.com/big.iso",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.url, "https://example.com/big.iso");
        assert_eq!(config.requests, 20);
        assert_eq!(config.workers, 4);
        assert_eq!(config.rest, Duration::from_millis(500));
        assert_eq!(config.user_agent(), Some("probe/1.0"));
        assert!(config
            .headers
            .contains(&("Accept".to_string(), "*/*".to_string())));
        assert_eq!(config.format, ReportFormat::Json);
    }

    #[test]
    fn test_non_positive_workers_coerced() {
        let config = parse(&["-w", "0", "http://example.com/"]).into_config().unwrap();
        assert_eq!(config.workers, 1);
        let config = parse(&["-w", "-3", "http://example.com/"]).into_config().unwrap();
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_log_level_must_be_known() {
        assert_eq!(parse(&["http://example.com/"]).log_level, "warn");
        assert!(parse(&["--log-level", "DEBUG", "http://example.com/"])
            .log_level
            .eq_ignore_ascii_case("debug"));
        assert!(Args::try_parse_from(["getload", "--log-level", "inf", "http://example.com/"]).is_err());
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(parse(&["-r", "-1", "http://example.com/"]).into_config().is_err());
        assert!(parse(&["-H", "nocolon", "http://example.com/"]).into_config().is_err());
    }
}
