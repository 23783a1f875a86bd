//! Shared test utilities for the getload workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A local HTTP target server with canned behaviors (sized bodies,
//!   redirect chains, stalls, arbitrary status codes)
//! - Request counters on that server (hits, in-flight, peak in-flight)
//! - Float comparison macros
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then in an async test:
//!
//! ```ignore
//! use test_utils::TargetServer;
//!
//! #[tokio::test]
//! async fn test_fetch() {
//!     let server = TargetServer::start().await;
//!     let url = server.url("/bytes/1024");
//!     // point the client at `url`...
//!     assert_eq!(server.stats().hits(), 1);
//! }
//! ```

pub mod target_server;

pub use target_server::{RecordedRequest, ServerStats, TargetServer};

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(0.5, 0.5000001, 0.0001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(2.5, 2.0, 0.1);
    }
}
