mod metrics;
mod report;
mod threshold;

use std::time::{Duration, Instant};

pub use metrics::{
    MetricsRegistry, MetricsSnapshot, OperationSummary, OutcomeRecord, RateSummary, TrendSummary,
    WorkflowMetrics, CHECKS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, REAL_ERRORS,
};
pub use report::print_report;
pub use threshold::{
    Aggregation, Comparison, Threshold, ThresholdOutcome, ThresholdParseError, ThresholdStatus,
};

/// A single timed request against the system under test.
///
/// Create the record just before sending the request so that the elapsed time covers the whole
/// round trip, then [OperationRecord::finish] it once the response (or error) is in hand.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    started: Instant,
    elapsed: Option<Duration>,
    is_error: bool,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
        }
    }

    pub fn finish(mut self, is_error: bool) -> Self {
        self.elapsed = Some(self.started.elapsed());
        self.is_error = is_error;
        self
    }

    /// The time between creating and finishing this record. A record that was never finished
    /// reports the time elapsed so far.
    pub fn duration(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}
