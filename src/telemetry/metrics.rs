//! Exchange metrics through the `metrics` facade.
//!
//! No recorder is installed here; without one every call is a no-op.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

pub const EXCHANGES_TOTAL: &str = "asub_exec_exchanges_total";
pub const EXCHANGE_FAILURES_TOTAL: &str = "asub_exec_exchange_failures_total";
pub const TIMEOUTS_TOTAL: &str = "asub_exec_timeouts_total";
pub const EXCHANGE_DURATION_MS: &str = "asub_exec_exchange_duration_ms";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(EXCHANGES_TOTAL, "Exchanges started");
    describe_counter!(EXCHANGE_FAILURES_TOTAL, "Exchanges that completed with failure");
    describe_counter!(TIMEOUTS_TOTAL, "Exchanges whose child had to be terminated");
    describe_histogram!(EXCHANGE_DURATION_MS, Unit::Milliseconds, "Wall time per exchange");
}

pub fn record_exchange_started(task: &str) {
    counter!(EXCHANGES_TOTAL, "task" => task.to_string()).increment(1);
}

pub fn record_exchange_finished(task: &str, success: bool, timed_out: bool, elapsed: Duration) {
    if !success {
        counter!(EXCHANGE_FAILURES_TOTAL, "task" => task.to_string()).increment(1);
    }
    if timed_out {
        counter!(TIMEOUTS_TOTAL, "task" => task.to_string()).increment(1);
    }
    histogram!(EXCHANGE_DURATION_MS, "task" => task.to_string()).record(elapsed.as_secs_f64() * 1000.0);
}
