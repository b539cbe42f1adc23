//! Structured logging with `tracing`.
//!
//! The SDK logs through `tracing` macros only. Delivery diagnostics go to
//! `debug!`/`warn!` under the `beacon_*` targets and never surface as
//! errors to the host application.
//!
//! - [`init_subscriber`] installs a compact stderr subscriber for hosts that
//!   have none of their own.
//! - [`capture_logs`] installs a thread-local capturing subscriber for tests.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}
