use clap::Parser;
use gale_runner::prelude::{init_logging, run, GaleResult};
use team_review_load::{scenario, ScenarioCli};

fn main() -> GaleResult<()> {
    init_logging();
    let cli = ScenarioCli::parse();

    let report = run(scenario(cli)?)?;

    if !report.passed() {
        anyhow::bail!("Run {} failed one or more thresholds", report.run_id);
    }

    Ok(())
}
