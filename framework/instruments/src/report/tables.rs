use tabled::Tabled;

use crate::metrics::{OperationSummary, RateSummary, TrendSummary};
use crate::threshold::{ThresholdOutcome, ThresholdStatus};

#[derive(Tabled)]
pub struct OperationRow {
    pub operation_id: String,
    #[tabled(display = "float2")]
    pub avg_time_ms: f64,
    #[tabled(display = "optional_float2")]
    pub min_time_ms: Option<f64>,
    #[tabled(display = "optional_float2")]
    pub max_time_ms: Option<f64>,
    pub total_operations: usize,
    pub failed: usize,
}

impl OperationRow {
    pub fn new(operation_id: &str, summary: &OperationSummary) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            avg_time_ms: summary.avg().as_secs_f64() * 1000.0,
            min_time_ms: summary.min.map(|d| d.as_secs_f64() * 1000.0),
            max_time_ms: summary.max.map(|d| d.as_secs_f64() * 1000.0),
            total_operations: summary.count,
            failed: summary.errors,
        }
    }
}

#[derive(Tabled)]
pub struct TrendRow {
    pub metric: String,
    pub count: u64,
    #[tabled(display = "float2")]
    pub avg: f64,
    #[tabled(display = "float2")]
    pub min: f64,
    #[tabled(display = "float2")]
    pub med: f64,
    #[tabled(display = "float2")]
    pub max: f64,
    #[tabled(rename = "p(95)", display = "float2")]
    pub p95: f64,
    #[tabled(rename = "p(99.9)", display = "float2")]
    pub p99_9: f64,
}

impl TrendRow {
    pub fn new(metric: &str, trend: &TrendSummary) -> Self {
        Self {
            metric: metric.to_string(),
            count: trend.count(),
            avg: trend.mean_ms(),
            min: trend.min_ms(),
            med: trend.median_ms(),
            max: trend.max_ms(),
            p95: trend.percentile_ms(95.0),
            p99_9: trend.percentile_ms(99.9),
        }
    }
}

#[derive(Tabled)]
pub struct RateRow {
    pub metric: String,
    #[tabled(display = "percent")]
    pub rate: f64,
    pub passes: u64,
    pub fails: u64,
}

impl RateRow {
    pub fn new(metric: &str, rate: &RateSummary) -> Self {
        Self {
            metric: metric.to_string(),
            rate: rate.rate(),
            passes: rate.passes,
            fails: rate.fails(),
        }
    }
}

#[derive(Tabled)]
pub struct CheckRow {
    pub check: String,
    #[tabled(display = "percent")]
    pub passed: f64,
    pub passes: u64,
    pub fails: u64,
}

impl CheckRow {
    pub fn new(check: &str, rate: &RateSummary) -> Self {
        Self {
            check: check.to_string(),
            passed: rate.rate(),
            passes: rate.passes,
            fails: rate.fails(),
        }
    }
}

#[derive(Tabled)]
pub struct ThresholdRow {
    pub metric: String,
    pub threshold: String,
    #[tabled(display = "optional_float4")]
    pub observed: Option<f64>,
    pub result: &'static str,
}

impl ThresholdRow {
    pub fn new(outcome: &ThresholdOutcome) -> Self {
        Self {
            metric: outcome.threshold.metric.clone(),
            threshold: outcome.threshold.expression(),
            observed: outcome.observed,
            result: match outcome.status {
                ThresholdStatus::Passed => "pass",
                ThresholdStatus::Failed => "FAIL",
                ThresholdStatus::NoData => "no data",
                ThresholdStatus::NotApplicable => "FAIL (not applicable)",
            },
        }
    }
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

fn percent(n: &f64) -> String {
    format!("{:.2}%", n * 100.0)
}

fn optional_float2(n: &Option<f64>) -> String {
    n.map(|n| float2(&n)).unwrap_or_else(|| "-".to_string())
}

fn optional_float4(n: &Option<f64>) -> String {
    n.map(|n| format!("{:.4}", n))
        .unwrap_or_else(|| "-".to_string())
}
