//! Telemetry: structured logging, exchange spans and metrics.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, verbosity_level, LogConfig, LogError, LogFormat, LogHandle};
pub use metrics::{
    init_metrics, record_exchange_finished, record_exchange_started, EXCHANGES_TOTAL,
    EXCHANGE_DURATION_MS, EXCHANGE_FAILURES_TOTAL, TIMEOUTS_TOTAL,
};
pub use spans::{ExchangeSpan, SpanExt};
pub use store::{HistogramSummary, MetricsSnapshot, MetricsStore};
