mod tables;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::metrics::MetricsSnapshot;
use crate::report::tables::{CheckRow, OperationRow, RateRow, ThresholdRow, TrendRow};
use crate::threshold::ThresholdOutcome;

/// Print the end of run summary: every metric followed by the threshold results.
pub fn print_report(snapshot: &MetricsSnapshot, outcomes: &[ThresholdOutcome]) {
    print_table(
        "Summary of operations",
        snapshot
            .operations
            .iter()
            .map(|(operation_id, summary)| OperationRow::new(operation_id, summary)),
    );

    print_table(
        "Trends (ms)",
        snapshot
            .trends
            .iter()
            .map(|(metric, trend)| TrendRow::new(metric, trend)),
    );

    print_table(
        "Rates",
        snapshot
            .rates
            .iter()
            .map(|(metric, rate)| RateRow::new(metric, rate)),
    );

    print_table(
        "Checks",
        snapshot
            .checks
            .iter()
            .map(|(check, rate)| CheckRow::new(check, rate)),
    );

    print_table("Thresholds", outcomes.iter().map(ThresholdRow::new));

    let failed = outcomes.iter().filter(|o| !o.passed()).count();
    if failed == 0 {
        println!("\nAll {} thresholds passed", outcomes.len());
    } else {
        println!("\n{} of {} thresholds crossed", failed, outcomes.len());
    }
}

fn print_table<R: Tabled>(title: &str, rows: impl Iterator<Item = R>) {
    let rows = rows.collect::<Vec<_>>();
    if rows.is_empty() {
        return;
    }

    println!("\n{title}");
    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{table}");
}
