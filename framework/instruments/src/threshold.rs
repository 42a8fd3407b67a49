use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::metrics::MetricsSnapshot;

/// How a metric is reduced to a single number before it is compared with the bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Med,
    Max,
    Count,
    Rate,
    /// `p(N)` for `0 < N <= 100`.
    Percentile(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    /// Longest symbols first so that `<=` is not read as `<`.
    const SYMBOLS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }

    fn symbol(self) -> &'static str {
        Self::SYMBOLS
            .iter()
            .find(|(_, c)| *c == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug, PartialEq)]
#[display("Invalid threshold `{input}`: {reason}")]
pub struct ThresholdParseError {
    input: String,
    reason: String,
}

impl ThresholdParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A pass/fail criterion over one metric, written like `p(95)<300` or `rate<0.001`.
///
/// Trend values are compared in milliseconds and rates as a fraction between 0 and 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let metric = metric.trim();
        if metric.is_empty()
            || !metric
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(ThresholdParseError::new(metric, "invalid metric name"));
        }

        let (position, symbol, comparison) = Comparison::SYMBOLS
            .iter()
            .filter_map(|(symbol, comparison)| {
                expression
                    .find(symbol)
                    .map(|position| (position, *symbol, *comparison))
            })
            // The leftmost operator wins, ties go to the longer symbol which is listed first.
            .min_by_key(|(position, _, _)| *position)
            .ok_or_else(|| ThresholdParseError::new(expression, "missing comparison operator"))?;

        let aggregation = parse_aggregation(expression, expression[..position].trim())?;
        let bound = expression[position + symbol.len()..]
            .trim()
            .parse::<f64>()
            .map_err(|e| ThresholdParseError::new(expression, format!("invalid bound: {e}")))?;

        Ok(Self {
            metric: metric.to_string(),
            aggregation,
            comparison,
            bound,
        })
    }

    /// Evaluate against the final metric values.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdOutcome {
        let observed = if let Some(trend) = snapshot.trend(&self.metric) {
            match self.aggregation {
                Aggregation::Avg => Some(trend.mean_ms()),
                Aggregation::Min => Some(trend.min_ms()),
                Aggregation::Med => Some(trend.median_ms()),
                Aggregation::Max => Some(trend.max_ms()),
                Aggregation::Count => Some(trend.count() as f64),
                Aggregation::Percentile(p) => Some(trend.percentile_ms(p)),
                Aggregation::Rate => None,
            }
            .ok_or(())
        } else if let Some(rate) = snapshot.rate(&self.metric) {
            match self.aggregation {
                Aggregation::Rate => Some(rate.rate()),
                Aggregation::Count => Some(rate.total as f64),
                _ => None,
            }
            .ok_or(())
        } else {
            return ThresholdOutcome {
                threshold: self.clone(),
                observed: None,
                status: ThresholdStatus::NoData,
            };
        };

        let (observed, status) = match observed {
            Ok(value) if self.comparison.holds(value, self.bound) => {
                (Some(value), ThresholdStatus::Passed)
            }
            Ok(value) => (Some(value), ThresholdStatus::Failed),
            Err(()) => (None, ThresholdStatus::NotApplicable),
        };

        ThresholdOutcome {
            threshold: self.clone(),
            observed,
            status,
        }
    }

    pub fn expression(&self) -> String {
        let aggregation = match self.aggregation {
            Aggregation::Avg => "avg".to_string(),
            Aggregation::Min => "min".to_string(),
            Aggregation::Med => "med".to_string(),
            Aggregation::Max => "max".to_string(),
            Aggregation::Count => "count".to_string(),
            Aggregation::Rate => "rate".to_string(),
            Aggregation::Percentile(p) => format!("p({p})"),
        };

        format!("{aggregation}{}{}", self.comparison.symbol(), self.bound)
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression())
    }
}

/// Parses `metric=expression`, the form used on the command line.
impl FromStr for Threshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (metric, expression) = s
            .split_once('=')
            .filter(|(_, expression)| !expression.starts_with('='))
            .ok_or_else(|| ThresholdParseError::new(s, "expected `metric=expression`"))?;

        Threshold::parse(metric, expression)
    }
}

fn parse_aggregation(input: &str, aggregation: &str) -> Result<Aggregation, ThresholdParseError> {
    match aggregation {
        "avg" => Ok(Aggregation::Avg),
        "min" => Ok(Aggregation::Min),
        "med" => Ok(Aggregation::Med),
        "max" => Ok(Aggregation::Max),
        "count" => Ok(Aggregation::Count),
        "rate" => Ok(Aggregation::Rate),
        other => {
            let percentile = other
                .strip_prefix("p(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| {
                    ThresholdParseError::new(input, format!("unknown aggregation `{other}`"))
                })?
                .trim()
                .parse::<f64>()
                .map_err(|e| ThresholdParseError::new(input, format!("invalid percentile: {e}")))?;

            if percentile <= 0.0 || percentile > 100.0 {
                return Err(ThresholdParseError::new(
                    input,
                    "percentile must be in (0, 100]",
                ));
            }

            Ok(Aggregation::Percentile(percentile))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStatus {
    Passed,
    Failed,
    /// The metric was never recorded during the run.
    NoData,
    /// The aggregation does not exist for this kind of metric, e.g. `rate` on a trend.
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub threshold: Threshold,
    pub observed: Option<f64>,
    pub status: ThresholdStatus,
}

impl ThresholdOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.status, ThresholdStatus::Passed | ThresholdStatus::NoData)
    }
}
