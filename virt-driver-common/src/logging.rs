//! Structured logging init, shared by the plugin binary and any test harness
//! that wants the same console format outside of `cargo test`'s own capture.

use std::path::Path;

use anyhow::Result;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Emoji used to flag lifecycle transitions in the console output. Kept
/// narrow on purpose — one marker per log line, not per field.
pub mod emoji {
    pub const VM: &str = "🖥️";
    pub const NETWORK: &str = "🌐";
    pub const ERROR: &str = "❌";
    pub const WARNING: &str = "⚠️";
}

/// Initialize console logging. `level` is used only when `RUST_LOG` is unset.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(true)
                .with_target(true)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
                .with_span_events(FmtSpan::CLOSE),
        )
        .init();

    Ok(())
}

/// Initialize JSON logging, for production deployments with log aggregation.
pub fn init_logging_json(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true),
        )
        .init();

    Ok(())
}

/// Selects console vs. JSON output based on a config flag, so `main.rs`
/// doesn't need to know about the layering details.
pub fn init(level: &str, json: bool, _log_dir: Option<&Path>) -> Result<()> {
    if json {
        init_logging_json(level)
    } else {
        init_logging(level)
    }
}

/// Trait for components that want a consistent `component = ...` field on
/// every log line without repeating it at every call site.
pub trait Loggable {
    fn log_component(&self) -> &'static str;

    fn log_debug(&self, msg: &str) {
        tracing::debug!(component = self.log_component(), "{}", msg);
    }

    fn log_info(&self, msg: &str) {
        tracing::info!(component = self.log_component(), "{}", msg);
    }

    fn log_warn(&self, msg: &str) {
        tracing::warn!(component = self.log_component(), "{} {}", emoji::WARNING, msg);
    }

    fn log_error(&self, msg: &str, err: &dyn std::error::Error) {
        tracing::error!(component = self.log_component(), error = %err, "{} {} | {}", emoji::ERROR, msg, err);
    }
}

/// Logs operation duration on drop unless `success`/`failure` was called
/// explicitly first.
pub struct TimedOperation {
    operation: String,
    start: std::time::Instant,
    finished: bool,
}

impl TimedOperation {
    pub fn new(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!(operation = %operation, "starting");
        Self { operation, start: std::time::Instant::now(), finished: false }
    }

    pub fn success(mut self) {
        self.finished = true;
        tracing::info!(operation = %self.operation, duration_ms = self.start.elapsed().as_millis(), "completed");
    }

    pub fn failure(mut self, error: &str) {
        self.finished = true;
        tracing::error!(operation = %self.operation, duration_ms = self.start.elapsed().as_millis(), error, "failed");
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(operation = %self.operation, duration_ms = self.start.elapsed().as_millis(), "ended without explicit success/failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_operation_success_does_not_panic() {
        let op = TimedOperation::new("test_operation");
        op.success();
    }

    #[test]
    fn timed_operation_failure_does_not_panic() {
        let op = TimedOperation::new("test_operation");
        op.failure("boom");
    }
}
