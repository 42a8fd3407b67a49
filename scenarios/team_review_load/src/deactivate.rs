use std::time::Instant;

use gale_runner::prelude::{MetricsRegistry, OutcomeRecord, WorkflowMetrics};
use review_service_client_instrumented::prelude::{ReviewServiceClient, StatusCode, TeamResponse};

use crate::checks::{check, SLOW_RESPONSE};

pub const DEACTIVATE_TEAM: WorkflowMetrics = WorkflowMetrics {
    duration: "deactivate_team_duration_ms",
    success: "deactivate_team_success",
};

/// Deactivate every member of `team_name` and record how it went.
///
/// Only a 200 is a success. Anything else, including a transport failure, is a real error.
pub async fn deactivate_team(
    client: &ReviewServiceClient,
    metrics: &MetricsRegistry,
    team_name: &str,
) -> OutcomeRecord {
    let started = Instant::now();
    let result = client.deactivate_team_members(team_name).await;
    let elapsed = started.elapsed();

    let success = matches!(&result, Ok(response) if response.status == StatusCode::OK);

    check(metrics, "deactivate team status is 200", success);
    check(
        metrics,
        "deactivate team duration < 300ms",
        elapsed < SLOW_RESPONSE,
    );
    check(
        metrics,
        "deactivate team response contains the team",
        result
            .as_ref()
            .ok()
            .and_then(|response| response.json::<TeamResponse>().ok())
            .is_some_and(|body| body.team.team_name == team_name),
    );

    match &result {
        Ok(response) if !success => log::error!(
            "Deactivating team {team_name} failed: {} - {}",
            response.status,
            response.error_summary()
        ),
        Err(e) => log::error!("Deactivating team {team_name} failed: {e:?}"),
        Ok(_) => {}
    }

    let outcome = OutcomeRecord {
        workflow: DEACTIVATE_TEAM,
        elapsed,
        success,
        real_error: !success,
    };
    metrics.record_outcome(outcome);

    outcome
}
