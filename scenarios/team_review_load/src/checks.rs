use std::time::Duration;

use gale_runner::prelude::MetricsRegistry;

/// Responses slower than this fail the duration checks.
pub const SLOW_RESPONSE: Duration = Duration::from_millis(300);

/// Record a check and warn when it fails. A failed check never changes how the outcome of a
/// workflow is classified.
pub fn check(metrics: &MetricsRegistry, name: &str, passed: bool) -> bool {
    metrics.add_check(name, passed);
    if !passed {
        log::warn!("Check failed: {name}");
    }
    passed
}
