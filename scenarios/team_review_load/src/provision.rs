use rand::seq::SliceRandom;
use rand::Rng;
use review_service_client_instrumented::prelude::{
    CreatePullRequest, ReviewServiceClient, StatusCode, Team, TeamMember,
};

/// How much data to create before the load starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub teams: usize,
    pub total_users: usize,
    pub pull_requests: usize,
    /// Number of leading teams whose members are activated after creation.
    pub activate_teams: usize,
    /// Upper bound on the member index activated in each of those teams.
    pub activate_members: usize,
}

impl Default for ProvisionPlan {
    fn default() -> Self {
        Self {
            teams: 10,
            total_users: 200,
            pull_requests: 10,
            activate_teams: 5,
            activate_members: 10,
        }
    }
}

impl ProvisionPlan {
    pub fn users_per_team(&self) -> usize {
        (self.total_users / self.teams.max(1)).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureTeam {
    pub name: String,
    pub member_user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixturePullRequest {
    pub id: String,
    pub author_user_id: String,
}

/// The teams and pull requests that exist on the service for this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureSet {
    teams: Vec<FixtureTeam>,
    pull_requests: Vec<FixturePullRequest>,
}

impl FixtureSet {
    pub fn teams(&self) -> &[FixtureTeam] {
        &self.teams
    }

    pub fn pull_requests(&self) -> &[FixturePullRequest] {
        &self.pull_requests
    }

    pub fn random_team<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&FixtureTeam> {
        self.teams.choose(rng)
    }

    pub fn random_pull_request<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&FixturePullRequest> {
        self.pull_requests.choose(rng)
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("None of the {attempted} teams could be created, no load will be generated")]
pub struct NoTeamsProvisionedError {
    pub attempted: usize,
}

pub fn team_name(index: usize, run_id: &str) -> String {
    format!("load-test-team-{index}-{run_id}")
}

pub fn pull_request_id(index: usize, run_id: &str) -> String {
    format!("load-pr-{index}-{run_id}")
}

pub fn member_user_id(team_index: usize, member_index: usize) -> String {
    format!("load-user-{team_index}-{member_index}")
}

fn member_username(team_index: usize, member_index: usize) -> String {
    format!("LoadUser{team_index}-{member_index}")
}

/// Create the teams, pull requests and active users that the workflows run against.
///
/// Each step tolerates data left behind by an earlier run: a Conflict is treated the same as
/// Created. Individual failures are logged and the item is left out of the fixture set. Only a
/// run where no team at all could be created is an error.
pub async fn provision(
    client: &ReviewServiceClient,
    plan: &ProvisionPlan,
    run_id: &str,
) -> anyhow::Result<FixtureSet> {
    let users_per_team = plan.users_per_team();
    let mut fixtures = FixtureSet::default();

    for team_index in 0..plan.teams {
        let members = (0..users_per_team)
            .map(|member_index| TeamMember {
                user_id: member_user_id(team_index, member_index),
                username: member_username(team_index, member_index),
                is_active: false,
            })
            .collect::<Vec<_>>();
        let team = Team {
            team_name: team_name(team_index, run_id),
            members,
        };

        match client.add_team(&team).await {
            Ok(response)
                if response.status == StatusCode::CREATED
                    || response.status == StatusCode::CONFLICT =>
            {
                fixtures.teams.push(FixtureTeam {
                    member_user_ids: team.members.into_iter().map(|m| m.user_id).collect(),
                    name: team.team_name,
                });
            }
            Ok(response) => log::warn!(
                "Failed to create team {}: {} - {}",
                team.team_name,
                response.status,
                response.error_summary()
            ),
            Err(e) => log::warn!("Failed to create team {}: {:?}", team.team_name, e),
        }
    }

    let Some(author) = fixtures
        .teams
        .first()
        .and_then(|team| team.member_user_ids.first())
        .cloned()
    else {
        log::error!("Could not create any teams");
        return Err(NoTeamsProvisionedError {
            attempted: plan.teams,
        }
        .into());
    };

    for index in 0..plan.pull_requests {
        let request = CreatePullRequest {
            pull_request_id: pull_request_id(index, run_id),
            pull_request_name: format!("Load test PR {index}"),
            author_id: author.clone(),
        };

        match client.create_pull_request(&request).await {
            Ok(response)
                if response.status == StatusCode::CREATED
                    || response.status == StatusCode::CONFLICT =>
            {
                fixtures.pull_requests.push(FixturePullRequest {
                    id: request.pull_request_id,
                    author_user_id: author.clone(),
                });
            }
            Ok(response) => log::warn!(
                "Failed to create pull request {}: {} - {}",
                request.pull_request_id,
                response.status,
                response.error_summary()
            ),
            Err(e) => log::warn!(
                "Failed to create pull request {}: {:?}",
                request.pull_request_id,
                e
            ),
        }
    }

    // The first member of each team is skipped, in the first team that is the PR author.
    for team in fixtures.teams.iter().take(plan.activate_teams) {
        let last = team.member_user_ids.len().min(plan.activate_members);
        for user_id in team.member_user_ids.iter().take(last).skip(1) {
            if let Err(e) = client.set_is_active(user_id, true).await {
                log::debug!("Could not activate {user_id}: {e:?}");
            }
        }
    }

    log::info!(
        "Provisioning complete: teams={}, users_per_team={}, total_users={}, pull_requests={}",
        fixtures.teams.len(),
        users_per_team,
        fixtures.teams.len() * users_per_team,
        fixtures.pull_requests.len()
    );

    Ok(fixtures)
}

#[cfg(test)]
impl FixtureSet {
    pub(crate) fn new(teams: Vec<FixtureTeam>, pull_requests: Vec<FixturePullRequest>) -> Self {
        Self {
            teams,
            pull_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Behaviour, StubService};
    use pretty_assertions::assert_eq;

    #[test]
    fn users_per_team_rounds_down_with_a_floor_of_one() {
        let mut plan = ProvisionPlan::default();
        assert_eq!(20, plan.users_per_team());

        plan.total_users = 25;
        plan.teams = 10;
        assert_eq!(2, plan.users_per_team());

        plan.total_users = 3;
        assert_eq!(1, plan.users_per_team());
    }

    #[test]
    fn fixture_names_embed_the_run_id() {
        assert_eq!("load-test-team-3-run-a", team_name(3, "run-a"));
        assert_eq!("load-pr-0-run-a", pull_request_id(0, "run-a"));
        assert_ne!(team_name(0, "run-a"), team_name(0, "run-b"));
        assert_eq!("load-user-2-7", member_user_id(2, 7));
    }

    #[test]
    fn default_plan_respects_bounds() {
        let stub = StubService::start(Behaviour::default());
        let plan = ProvisionPlan::default();

        let fixtures = stub.block_on(|client| async move {
            provision(&client, &plan, "bounds").await
        });
        let fixtures = fixtures.unwrap();

        assert_eq!(10, fixtures.teams().len());
        assert!(fixtures
            .teams()
            .iter()
            .all(|team| team.member_user_ids.len() == 20));
        assert_eq!(10, fixtures.pull_requests().len());
        assert!(fixtures
            .pull_requests()
            .iter()
            .all(|pr| pr.author_user_id == "load-user-0-0"));

        // Teams 0..5, members 1..10.
        let activated = stub.state().activated.clone();
        assert_eq!(5 * 9, activated.len());
        assert!(!activated.contains(&"load-user-0-0".to_string()));
        assert!(activated.contains(&"load-user-4-9".to_string()));
        assert!(!activated.contains(&"load-user-5-1".to_string()));
    }

    #[test]
    fn keeps_only_created_or_conflicting_teams() {
        let stub = StubService::start(Behaviour {
            team_add_statuses: vec![201, 409, 500, 201, 400],
            ..Default::default()
        });
        let plan = ProvisionPlan {
            teams: 5,
            total_users: 10,
            pull_requests: 2,
            ..Default::default()
        };

        let fixtures = stub
            .block_on(|client| async move { provision(&client, &plan, "mixed").await })
            .unwrap();

        let names = fixtures
            .teams()
            .iter()
            .map(|team| team.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                "load-test-team-0-mixed",
                "load-test-team-1-mixed",
                "load-test-team-3-mixed"
            ],
            names
        );
        assert_eq!(2, fixtures.pull_requests().len());
    }

    #[test]
    fn no_teams_is_fatal() {
        let stub = StubService::start(Behaviour {
            team_add_statuses: vec![500],
            ..Default::default()
        });
        let plan = ProvisionPlan {
            teams: 3,
            ..Default::default()
        };

        let err = stub
            .block_on(|client| async move { provision(&client, &plan, "none").await })
            .unwrap_err();

        assert_eq!(3, err.downcast_ref::<NoTeamsProvisionedError>().unwrap().attempted);
        assert_eq!(0, stub.state().pull_request_create_calls);
    }

    #[test]
    fn failed_pull_requests_are_left_out() {
        let stub = StubService::start(Behaviour {
            pr_create_statuses: vec![201, 500, 409],
            ..Default::default()
        });
        let plan = ProvisionPlan {
            teams: 1,
            total_users: 2,
            pull_requests: 3,
            ..Default::default()
        };

        let fixtures = stub
            .block_on(|client| async move { provision(&client, &plan, "prs").await })
            .unwrap();

        let ids = fixtures
            .pull_requests()
            .iter()
            .map(|pr| pr.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(vec!["load-pr-0-prs", "load-pr-2-prs"], ids);
    }
}
