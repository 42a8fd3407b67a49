pub mod behaviour;
pub mod checks;
pub mod deactivate;
pub mod provision;
pub mod reassign;
#[cfg(test)]
mod test_support;

use std::time::Duration;

use clap::Parser;
use gale_runner::prelude::*;

use crate::behaviour::{caller_behaviour, service_is_healthy, setup, CallerValues, ScenarioValues};
use crate::deactivate::DEACTIVATE_TEAM;
use crate::provision::ProvisionPlan;
use crate::reassign::REASSIGN_REVIEWER;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct ScenarioCli {
    #[command(flatten)]
    pub gale: GaleScenarioCli,

    /// Number of teams to create before the load starts
    #[clap(long, default_value_t = 10)]
    pub teams: usize,

    /// Number of users, shared evenly between the teams
    #[clap(long, default_value_t = 200)]
    pub total_users: usize,

    /// Number of pull requests to create before the load starts
    #[clap(long, default_value_t = 10)]
    pub pull_requests: usize,

    /// Timeout for each workflow request, e.g. `10s` or `500ms`
    #[clap(long, default_value = "10s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    /// How many times to check that the service is up before giving up
    #[clap(long, default_value_t = 30)]
    pub readiness_attempts: usize,

    /// Delay between readiness checks
    #[clap(long, default_value = "1s", value_parser = parse_duration)]
    pub readiness_delay: Duration,
}

pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(Duration::from_secs(30), 5),
        Stage::new(Duration::from_secs(120), 5),
        Stage::new(Duration::from_secs(30), 10),
        Stage::new(Duration::from_secs(60), 5),
        Stage::new(Duration::from_secs(30), 0),
    ]
}

pub fn default_thresholds() -> anyhow::Result<Vec<Threshold>> {
    let latency = ["p(95)<300", "p(99.9)<300"];
    let mut thresholds = Vec::new();

    for metric in [
        HTTP_REQ_DURATION,
        DEACTIVATE_TEAM.duration,
        REASSIGN_REVIEWER.duration,
    ] {
        for expression in latency {
            thresholds.push(Threshold::parse(metric, expression)?);
        }
    }
    thresholds.push(Threshold::parse(HTTP_REQ_FAILED, "rate<0.001")?);
    thresholds.push(Threshold::parse(REAL_ERRORS, "rate<0.001")?);

    Ok(thresholds)
}

pub fn scenario(
    cli: ScenarioCli,
) -> anyhow::Result<ScenarioDefinitionBuilder<ScenarioValues, CallerValues>> {
    let plan = ProvisionPlan {
        teams: cli.teams,
        total_users: cli.total_users,
        pull_requests: cli.pull_requests,
        ..Default::default()
    };

    Ok(
        ScenarioDefinitionBuilder::<ScenarioValues, CallerValues>::new(
            env!("CARGO_PKG_NAME"),
            cli.gale,
        )
        .with_default_stages(default_stages())
        .with_default_thresholds(default_thresholds()?)
        .use_values(ScenarioValues::new(plan, cli.request_timeout))
        .use_readiness_check(
            service_is_healthy,
            cli.readiness_attempts,
            cli.readiness_delay,
        )
        .use_setup(setup)
        .use_caller_behaviour(caller_behaviour),
    )
}
