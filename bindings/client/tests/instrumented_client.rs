use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

use axum::http::StatusCode as StubStatus;
use axum::routing::{get, post};
use axum::{Json, Router};
use gale_instruments::{MetricsRegistry, HTTP_REQ_FAILED};
use pretty_assertions::assert_eq;
use review_service_client_instrumented::prelude::{
    PullRequestResponse, ReviewServiceClient, StatusCode, Team, TeamMember,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

struct Stub {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Stub {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn spawn_stub() -> Stub {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let app = Router::new()
        .route("/health", get(|| async { StubStatus::OK }))
        .route(
            "/team/add",
            post(|| async {
                (
                    StubStatus::CONFLICT,
                    Json(json!({"error": {"code": "TEAM_EXISTS", "message": "team exists"}})),
                )
            }),
        )
        .route(
            "/pullRequest/get",
            get(|| async {
                Json(json!({"pr": {"pull_request_id": "pr-1", "assigned_reviewers": ["u2", "u3"]}}))
            }),
        )
        .route(
            "/pullRequest/reassign",
            post(|Json(body): Json<Value>| async move {
                if body["old_user_id"] == "u2" {
                    (StubStatus::CONFLICT, Json(json!({"error": {"code": "NO_CANDIDATE", "message": "none"}})))
                } else {
                    (StubStatus::INTERNAL_SERVER_ERROR, Json(json!({"error": {"code": "INTERNAL", "message": "boom"}})))
                }
            }),
        );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
    });

    Stub {
        base_url,
        shutdown: Some(shutdown_tx),
    }
}

#[test]
fn records_operations_against_expected_statuses() {
    let stub = spawn_stub();
    let metrics = MetricsRegistry::start().unwrap();
    let client =
        ReviewServiceClient::new(&stub.base_url, Duration::from_secs(5), metrics.clone()).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    runtime.block_on(async {
        assert!(client.health().await.unwrap());

        let team = Team {
            team_name: "team-a".to_string(),
            members: vec![TeamMember {
                user_id: "u1".to_string(),
                username: "User1".to_string(),
                is_active: true,
            }],
        };
        let added = client.add_team(&team).await.unwrap();
        assert_eq!(StatusCode::CONFLICT, added.status);

        let fetched = client.get_pull_request("pr-1").await.unwrap();
        let pr: PullRequestResponse = fetched.json().unwrap();
        assert_eq!(
            vec!["u2".to_string(), "u3".to_string()],
            pr.pr.unwrap().assigned_reviewers
        );

        let conflict = client.reassign_reviewer("pr-1", "u2").await.unwrap();
        assert_eq!(StatusCode::CONFLICT, conflict.status);

        let failed = client.reassign_reviewer("pr-1", "u3").await.unwrap();
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, failed.status);
        assert!(failed.body_excerpt().contains("INTERNAL"));
    });

    let snapshot = metrics.snapshot().unwrap();

    // The health probe is not recorded, the only failure is the 500.
    let failed = snapshot.rate(HTTP_REQ_FAILED).unwrap();
    assert_eq!(4, failed.total);
    assert_eq!(1, failed.passes);

    assert_eq!(2, snapshot.operations["pull_request_reassign"].count);
    assert_eq!(1, snapshot.operations["pull_request_reassign"].errors);
    assert_eq!(0, snapshot.operations["team_add"].errors);
}

#[test]
fn transport_failure_is_recorded_as_failed() {
    // Bind and drop to get a port with nothing listening on it.
    let port = StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let metrics = MetricsRegistry::start().unwrap();
    let client = ReviewServiceClient::new(
        &format!("http://127.0.0.1:{port}"),
        Duration::from_secs(2),
        metrics.clone(),
    )
    .unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let result = runtime.block_on(client.deactivate_team_members("team-a"));
    assert!(result.is_err());
    assert!(runtime.block_on(client.health()).is_err());

    let snapshot = metrics.snapshot().unwrap();
    let failed = snapshot.rate(HTTP_REQ_FAILED).unwrap();
    assert_eq!(1, failed.total);
    assert_eq!(1, failed.passes);
}
