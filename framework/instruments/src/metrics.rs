use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use hdrhistogram::Histogram;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::OperationRecord;

/// Latency of every instrumented request, in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Share of instrumented requests that got an unexpected status or no response at all.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Share of workflow invocations that ended in a real error.
pub const REAL_ERRORS: &str = "real_errors";
/// Share of passing checks, across all checks.
pub const CHECKS: &str = "checks";

/// Highest latency that can be told apart from the next one: one hour, in microseconds.
const HISTOGRAM_MAX_MICROS: u64 = 60 * 60 * 1_000_000;

/// Names of the metrics that one workflow reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowMetrics {
    /// Trend receiving the elapsed time of each invocation.
    pub duration: &'static str,
    /// Rate receiving the success classification of each invocation.
    pub success: &'static str,
}

/// The classified result of one workflow invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeRecord {
    pub workflow: WorkflowMetrics,
    pub elapsed: Duration,
    pub success: bool,
    pub real_error: bool,
}

enum MetricEvent {
    Trend { name: String, value: Duration },
    Rate { name: String, passed: bool },
    Check { name: String, passed: bool },
    Outcome(OutcomeRecord),
    Operation(OperationRecord),
    Snapshot(oneshot::Sender<MetricsSnapshot>),
}

/// Handle to the process wide metrics aggregator.
///
/// All state lives on a single aggregator thread. Handles only hold the sending half of a
/// channel, so they are cheap to clone and safe to use from any number of callers at once.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    writer: UnboundedSender<MetricEvent>,
}

impl std::fmt::Debug for MetricEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricEvent::Trend { name, .. } => write!(f, "Trend({name})"),
            MetricEvent::Rate { name, .. } => write!(f, "Rate({name})"),
            MetricEvent::Check { name, .. } => write!(f, "Check({name})"),
            MetricEvent::Outcome(outcome) => write!(f, "Outcome({})", outcome.workflow.duration),
            MetricEvent::Operation(record) => write!(f, "Operation({})", record.operation_id),
            MetricEvent::Snapshot(_) => write!(f, "Snapshot"),
        }
    }
}

impl MetricsRegistry {
    /// Start the aggregator thread and return a handle to it.
    ///
    /// The aggregator runs until every handle has been dropped.
    pub fn start() -> anyhow::Result<Self> {
        let template = Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 3)
            .context("Failed to create latency histogram")?;

        let (writer, receiver) = tokio::sync::mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("metrics".to_string())
            .spawn(move || Aggregator::new(template).run(receiver))
            .context("Failed to start metrics aggregator thread")?;

        Ok(Self { writer })
    }

    /// Record one sample into the named duration distribution.
    pub fn add_trend(&self, name: &str, value: Duration) {
        self.try_send(MetricEvent::Trend {
            name: name.to_string(),
            value,
        });
    }

    /// Record one boolean sample into the named rate.
    pub fn add_rate(&self, name: &str, passed: bool) {
        self.try_send(MetricEvent::Rate {
            name: name.to_string(),
            passed,
        });
    }

    /// Record the result of a named check. Feeds both the per-check counts and [CHECKS].
    pub fn add_check(&self, name: &str, passed: bool) {
        self.try_send(MetricEvent::Check {
            name: name.to_string(),
            passed,
        });
    }

    /// Fold a workflow outcome into its duration trend, its success rate and [REAL_ERRORS].
    ///
    /// All three are applied from the same event so they can never drift apart.
    pub fn record_outcome(&self, outcome: OutcomeRecord) {
        self.try_send(MetricEvent::Outcome(outcome));
    }

    /// Record a finished request into [HTTP_REQ_DURATION], [HTTP_REQ_FAILED] and the
    /// per-operation summary.
    pub fn add_operation(&self, record: OperationRecord) {
        self.try_send(MetricEvent::Operation(record));
    }

    /// Take a consistent copy of everything recorded so far.
    ///
    /// Every sample sent before this call is included. This blocks the calling thread so it must
    /// not be called from inside an async context.
    pub fn snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let (reply, response) = oneshot::channel();
        self.writer
            .send(MetricEvent::Snapshot(reply))
            .map_err(|_| anyhow::anyhow!("Metrics aggregator has stopped"))?;

        response
            .blocking_recv()
            .context("Metrics aggregator dropped the snapshot request")
    }

    fn try_send(&self, event: MetricEvent) {
        if let Err(e) = self.writer.send(event) {
            log::warn!("Failed to record metric because the aggregator has stopped: {:?}", e.0);
        }
    }
}

struct Aggregator {
    template: Histogram<u64>,
    snapshot: MetricsSnapshot,
}

impl Aggregator {
    fn new(template: Histogram<u64>) -> Self {
        Self {
            template,
            snapshot: MetricsSnapshot::default(),
        }
    }

    fn run(mut self, mut receiver: UnboundedReceiver<MetricEvent>) {
        while let Some(event) = receiver.blocking_recv() {
            self.apply(event);
        }

        log::debug!("Metrics aggregator shutting down, all handles dropped");
    }

    fn apply(&mut self, event: MetricEvent) {
        match event {
            MetricEvent::Trend { name, value } => self.trend(&name, value),
            MetricEvent::Rate { name, passed } => self.rate(&name, passed),
            MetricEvent::Check { name, passed } => {
                self.snapshot.checks.entry(name).or_default().add(passed);
                self.rate(CHECKS, passed);
            }
            MetricEvent::Outcome(outcome) => {
                self.trend(outcome.workflow.duration, outcome.elapsed);
                self.rate(outcome.workflow.success, outcome.success);
                self.rate(REAL_ERRORS, outcome.real_error);
            }
            MetricEvent::Operation(record) => {
                let duration = record.duration();
                let is_error = record.is_error();
                self.trend(HTTP_REQ_DURATION, duration);
                self.rate(HTTP_REQ_FAILED, is_error);
                self.snapshot
                    .operations
                    .entry(record.operation_id)
                    .or_default()
                    .add(duration, is_error);
            }
            MetricEvent::Snapshot(reply) => {
                // The requester may have given up waiting, nothing to do in that case.
                let _ = reply.send(self.snapshot.clone());
            }
        }
    }

    fn trend(&mut self, name: &str, value: Duration) {
        let micros = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);
        match self.snapshot.trends.get_mut(name) {
            Some(trend) => trend.histogram.saturating_record(micros),
            None => {
                let mut histogram = self.template.clone();
                histogram.saturating_record(micros);
                self.snapshot
                    .trends
                    .insert(name.to_string(), TrendSummary { histogram });
            }
        }
    }

    fn rate(&mut self, name: &str, passed: bool) {
        match self.snapshot.rates.get_mut(name) {
            Some(rate) => rate.add(passed),
            None => {
                let mut rate = RateSummary::default();
                rate.add(passed);
                self.snapshot.rates.insert(name.to_string(), rate);
            }
        }
    }
}

/// A point in time copy of every metric.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub trends: BTreeMap<String, TrendSummary>,
    pub rates: BTreeMap<String, RateSummary>,
    pub checks: BTreeMap<String, RateSummary>,
    pub operations: BTreeMap<String, OperationSummary>,
}

impl MetricsSnapshot {
    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        self.trends.get(name)
    }

    pub fn rate(&self, name: &str) -> Option<&RateSummary> {
        self.rates.get(name)
    }

    pub fn check(&self, name: &str) -> Option<&RateSummary> {
        self.checks.get(name)
    }
}

/// Distribution of durations, recorded with microsecond precision and reported in milliseconds.
#[derive(Debug, Clone)]
pub struct TrendSummary {
    histogram: Histogram<u64>,
}

impl TrendSummary {
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn min_ms(&self) -> f64 {
        micros_to_ms(self.histogram.min())
    }

    pub fn max_ms(&self) -> f64 {
        micros_to_ms(self.histogram.max())
    }

    pub fn mean_ms(&self) -> f64 {
        self.histogram.mean() / 1000.0
    }

    pub fn median_ms(&self) -> f64 {
        self.percentile_ms(50.0)
    }

    /// The value below which `percentile` percent of samples fall, e.g. `99.9`.
    pub fn percentile_ms(&self, percentile: f64) -> f64 {
        micros_to_ms(
            self.histogram
                .value_at_quantile((percentile / 100.0).clamp(0.0, 1.0)),
        )
    }
}

/// Counts of boolean samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateSummary {
    pub passes: u64,
    pub total: u64,
}

impl RateSummary {
    fn add(&mut self, passed: bool) {
        self.total += 1;
        if passed {
            self.passes += 1;
        }
    }

    pub fn fails(&self) -> u64 {
        self.total - self.passes
    }

    /// Share of samples that were `true`. Zero when there are no samples.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passes as f64 / self.total as f64
        }
    }
}

/// Timing summary for one kind of request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSummary {
    pub count: usize,
    pub errors: usize,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

impl OperationSummary {
    fn add(&mut self, duration: Duration, is_error: bool) {
        self.count += 1;
        self.total += duration;
        if is_error {
            self.errors += 1;
            return;
        }

        // Failed requests are often fast rejections, keep them out of the min/max.
        self.min = Some(self.min.map_or(duration, |min| min.min(duration)));
        self.max = Some(self.max.map_or(duration, |max| max.max(duration)));
    }

    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}
