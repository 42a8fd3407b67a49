use std::time::Duration;

use anyhow::Context;
use gale_runner::prelude::{CallerContext, HookResult, RunnerContext, UserValuesConstraint};
use review_service_client_instrumented::prelude::ReviewServiceClient;

use crate::deactivate::deactivate_team;
use crate::provision::{provision, FixtureSet, ProvisionPlan};
use crate::reassign::reassign_reviewer;

/// Pause after each workflow so that a caller does not hammer the service back to back.
const PACING: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
pub struct ScenarioValues {
    pub plan: ProvisionPlan,
    pub request_timeout: Duration,
    client: Option<ReviewServiceClient>,
    fixtures: FixtureSet,
}

impl UserValuesConstraint for ScenarioValues {}

impl ScenarioValues {
    pub fn new(plan: ProvisionPlan, request_timeout: Duration) -> Self {
        Self {
            plan,
            request_timeout,
            ..Default::default()
        }
    }

    fn client(&self) -> anyhow::Result<&ReviewServiceClient> {
        self.client
            .as_ref()
            .context("The review service client has not been created")
    }
}

#[derive(Debug, Default)]
pub struct CallerValues {
    iterations: u64,
}

impl UserValuesConstraint for CallerValues {}

fn ensure_client(ctx: &mut RunnerContext<ScenarioValues>) -> anyhow::Result<ReviewServiceClient> {
    if let Some(client) = &ctx.get().client {
        return Ok(client.clone());
    }

    let client = ReviewServiceClient::new(
        ctx.connection_string(),
        ctx.get().request_timeout,
        ctx.metrics().clone(),
    )?;
    ctx.get_mut().client = Some(client.clone());

    Ok(client)
}

/// Readiness probe, `GET /health`.
pub fn service_is_healthy(ctx: &mut RunnerContext<ScenarioValues>) -> anyhow::Result<bool> {
    let client = ensure_client(ctx)?;
    ctx.executor()
        .execute_in_place(async move { client.health().await })
}

/// Provision the fixtures for this run.
pub fn setup(ctx: &mut RunnerContext<ScenarioValues>) -> HookResult {
    let client = ensure_client(ctx)?;
    let plan = ctx.get().plan.clone();
    let run_id = ctx.run_id().to_string();

    log::info!(
        "Provisioning {} teams, {} users and {} pull requests for run {run_id}",
        plan.teams,
        plan.total_users,
        plan.pull_requests
    );

    let fixtures = ctx
        .executor()
        .execute_in_place(async move { provision(&client, &plan, &run_id).await })?;
    ctx.get_mut().fixtures = fixtures;

    Ok(())
}

/// One iteration: deactivate a random team, then reassign a reviewer on a random pull request.
pub fn caller_behaviour(ctx: &mut CallerContext<ScenarioValues, CallerValues>) -> HookResult {
    let runner_context = ctx.runner_context().clone();
    let values = runner_context.get();
    let client = values.client()?;
    let metrics = runner_context.metrics();

    ctx.get_mut().iterations += 1;
    log::trace!(
        "{} starting iteration {}",
        ctx.caller_id(),
        ctx.get().iterations
    );

    let Some(team) = values.fixtures.random_team(&mut rand::thread_rng()) else {
        return ctx.pause(PACING);
    };
    runner_context
        .executor()
        .execute_in_place(async { Ok(deactivate_team(client, metrics, &team.name).await) })?;

    ctx.pause(PACING)?;

    if let Some(pull_request) = values
        .fixtures
        .random_pull_request(&mut rand::thread_rng())
    {
        runner_context.executor().execute_in_place(async {
            Ok(reassign_reviewer(client, metrics, &pull_request.id).await)
        })?;
    }

    ctx.pause(PACING)
}
