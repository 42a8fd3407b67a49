use std::time::Instant;

use gale_runner::prelude::{MetricsRegistry, OutcomeRecord, WorkflowMetrics};
use review_service_client_instrumented::prelude::{
    PullRequestResponse, ReassignResponse, ReviewServiceClient, StatusCode,
};

use crate::checks::{check, SLOW_RESPONSE};

pub const REASSIGN_REVIEWER: WorkflowMetrics = WorkflowMetrics {
    duration: "reassign_reviewer_duration_ms",
    success: "reassign_reviewer_success",
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReassignOutcome {
    /// The pull request could not be fetched. Nothing was recorded.
    Skipped,
    /// The pull request has no reviewers, or the fetch returned no pull request, so there was
    /// nothing to reassign.
    NothingToReassign(OutcomeRecord),
    /// A reassignment was requested.
    Attempted {
        status: Option<StatusCode>,
        outcome: OutcomeRecord,
    },
}

/// Replace the first assigned reviewer of `pull_request_id`.
///
/// A Conflict means that no replacement was available or that another caller reassigned the
/// same reviewer first. Both are expected under concurrent load and count as success.
pub async fn reassign_reviewer(
    client: &ReviewServiceClient,
    metrics: &MetricsRegistry,
    pull_request_id: &str,
) -> ReassignOutcome {
    let started = Instant::now();

    let pull_request = match client.get_pull_request(pull_request_id).await {
        Ok(response) if response.status == StatusCode::OK => {
            match response.json::<PullRequestResponse>() {
                Ok(body) => body.pr,
                Err(e) => {
                    log::debug!("Skipping reassign for {pull_request_id}: {e:?}");
                    return ReassignOutcome::Skipped;
                }
            }
        }
        Ok(response) => {
            log::debug!(
                "Skipping reassign for {pull_request_id}, fetch returned {}",
                response.status
            );
            return ReassignOutcome::Skipped;
        }
        Err(e) => {
            log::debug!("Skipping reassign for {pull_request_id}: {e:?}");
            return ReassignOutcome::Skipped;
        }
    };

    let Some(old_user_id) = pull_request
        .as_ref()
        .and_then(|pr| pr.assigned_reviewers.first())
    else {
        let outcome = OutcomeRecord {
            workflow: REASSIGN_REVIEWER,
            elapsed: started.elapsed(),
            success: true,
            real_error: false,
        };
        metrics.record_outcome(outcome);
        return ReassignOutcome::NothingToReassign(outcome);
    };

    let result = client
        .reassign_reviewer(pull_request_id, old_user_id)
        .await;
    let elapsed = started.elapsed();

    let status = result.as_ref().ok().map(|response| response.status);
    let success =
        status.is_some_and(|status| status == StatusCode::OK || status == StatusCode::CONFLICT);

    check(metrics, "reassign reviewer status is 200 or 409", success);
    check(
        metrics,
        "reassign reviewer duration < 300ms",
        elapsed < SLOW_RESPONSE,
    );
    let body_matches = match &result {
        Ok(response) if response.status == StatusCode::CONFLICT => true,
        Ok(response) => response
            .json::<ReassignResponse>()
            .is_ok_and(|body| body.pr.pull_request_id == pull_request_id),
        Err(_) => false,
    };
    check(
        metrics,
        "reassign reviewer response contains the PR",
        body_matches,
    );

    match &result {
        Ok(response) if !success => log::error!(
            "Reassigning reviewer on {pull_request_id} failed: {} - {}",
            response.status,
            response.error_summary()
        ),
        Err(e) => log::error!("Reassigning reviewer on {pull_request_id} failed: {e:?}"),
        Ok(_) => {}
    }

    let outcome = OutcomeRecord {
        workflow: REASSIGN_REVIEWER,
        elapsed,
        success,
        real_error: !success,
    };
    metrics.record_outcome(outcome);

    ReassignOutcome::Attempted { status, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Behaviour, StubService};
    use gale_runner::prelude::REAL_ERRORS;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reassign(stub: &StubService) -> ReassignOutcome {
        stub.block_on(|client| {
            let metrics = stub.metrics().clone();
            async move { reassign_reviewer(&client, &metrics, "pr-1").await }
        })
    }

    #[test]
    fn no_reviewers_is_success_without_a_reassign_call() {
        let stub = StubService::start(Behaviour {
            assigned_reviewers: vec![],
            ..Default::default()
        });

        let ReassignOutcome::NothingToReassign(outcome) = reassign(&stub) else {
            panic!("expected nothing to reassign");
        };

        assert!(outcome.success);
        assert!(!outcome.real_error);
        assert_eq!(0, stub.state().reassign_calls);

        let snapshot = stub.metrics().snapshot().unwrap();
        assert_eq!(
            1,
            snapshot.rate(REASSIGN_REVIEWER.success).unwrap().passes
        );
        // No checks are recorded when nothing was reassigned.
        assert!(snapshot.checks.is_empty());
    }

    #[test]
    fn conflict_is_success() {
        let stub = StubService::start(Behaviour {
            reassign_status: 409,
            ..Default::default()
        });

        let ReassignOutcome::Attempted { status, outcome } = reassign(&stub) else {
            panic!("expected a reassign attempt");
        };

        assert_eq!(Some(StatusCode::CONFLICT), status);
        assert!(outcome.success);
        assert!(!outcome.real_error);
        assert_eq!(vec!["reviewer-1".to_string()], stub.state().reassigned_from);

        let snapshot = stub.metrics().snapshot().unwrap();
        assert_eq!(
            0,
            snapshot
                .check("reassign reviewer response contains the PR")
                .unwrap()
                .fails()
        );
        // An expected conflict does not count as a failed request.
        assert_eq!(0, snapshot.rate("http_req_failed").unwrap().passes);
    }

    #[test]
    fn mismatched_body_only_fails_the_check() {
        let stub = StubService::start(Behaviour {
            reassign_wrong_pr: true,
            ..Default::default()
        });

        let ReassignOutcome::Attempted { outcome, .. } = reassign(&stub) else {
            panic!("expected a reassign attempt");
        };

        assert!(outcome.success);
        assert!(!outcome.real_error);

        let snapshot = stub.metrics().snapshot().unwrap();
        assert_eq!(
            1,
            snapshot
                .check("reassign reviewer response contains the PR")
                .unwrap()
                .fails()
        );
        assert_eq!(0, snapshot.rate(REAL_ERRORS).unwrap().passes);
    }

    #[test]
    fn server_error_is_a_real_error() {
        let stub = StubService::start(Behaviour {
            reassign_status: 500,
            ..Default::default()
        });

        let ReassignOutcome::Attempted { outcome, .. } = reassign(&stub) else {
            panic!("expected a reassign attempt");
        };

        assert!(!outcome.success);
        assert!(outcome.real_error);
    }

    #[test]
    fn fetch_without_a_pull_request_is_nothing_to_reassign() {
        for body in [json!({}), json!({ "pr": null })] {
            let stub = StubService::start(Behaviour {
                get_body: Some(body.clone()),
                ..Default::default()
            });

            let ReassignOutcome::NothingToReassign(outcome) = reassign(&stub) else {
                panic!("expected nothing to reassign for {body}");
            };

            assert!(outcome.success);
            assert!(!outcome.real_error);
            assert_eq!(0, stub.state().reassign_calls);
            let snapshot = stub.metrics().snapshot().unwrap();
            assert_eq!(
                1,
                snapshot.rate(REASSIGN_REVIEWER.success).unwrap().passes
            );
        }
    }

    #[test]
    fn failed_fetch_records_nothing() {
        let stub = StubService::start(Behaviour {
            get_status: 404,
            ..Default::default()
        });

        assert_eq!(ReassignOutcome::Skipped, reassign(&stub));

        let snapshot = stub.metrics().snapshot().unwrap();
        assert!(snapshot.trend(REASSIGN_REVIEWER.duration).is_none());
        assert!(snapshot.rate(REAL_ERRORS).is_none());
        assert_eq!(0, stub.state().reassign_calls);
    }
}
