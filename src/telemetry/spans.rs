//! Span utilities and extension traits for exchange tracing.

use tracing::{info_span, Span};
use uuid::Uuid;

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    /// Record the child's pid once it is known.
    fn record_pid(&self, pid: i32);

    /// Record the exit code an exchange settled on.
    fn record_exit(&self, exit_code: i32);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_pid(&self, pid: i32) {
        self.record("pid", pid);
    }

    fn record_exit(&self, exit_code: i32) {
        self.record("exit_code", exit_code);
    }
}

/// Factory for exchange spans.
pub struct ExchangeSpan;

impl ExchangeSpan {
    /// Create a span for one exchange of `task`.
    ///
    /// `pid`, `status`, `exit_code`, `error.message` and `elapsed_ms` start
    /// empty and are filled in as the exchange progresses.
    pub fn new(task: &str, exchange_id: &Uuid) -> Span {
        info_span!(
            "exchange",
            task = %task,
            exchange_id = %exchange_id,
            pid = tracing::field::Empty,
            status = tracing::field::Empty,
            exit_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        )
    }
}
