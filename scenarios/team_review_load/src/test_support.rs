//! An in-process stand-in for the review service, served by axum on a random local port.

use std::future::Future;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use gale_runner::prelude::MetricsRegistry;
use parking_lot::{Mutex, MutexGuard};
use review_service_client_instrumented::prelude::ReviewServiceClient;
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// How the stub answers each endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Behaviour {
    pub health_status: u16,
    /// Status for the n-th team created. The last entry repeats, empty means 201.
    pub team_add_statuses: Vec<u16>,
    /// Status for the n-th pull request created. The last entry repeats, empty means 201.
    pub pr_create_statuses: Vec<u16>,
    pub deactivate_status: u16,
    pub deactivate_wrong_team: bool,
    /// Members in the deactivate response, an empty list when unset.
    pub deactivate_members: Option<Value>,
    pub get_status: u16,
    /// Replaces the whole body of a successful pull request fetch.
    pub get_body: Option<Value>,
    pub assigned_reviewers: Vec<String>,
    pub reassign_status: u16,
    pub reassign_wrong_pr: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            health_status: 200,
            team_add_statuses: vec![],
            pr_create_statuses: vec![],
            deactivate_status: 200,
            deactivate_wrong_team: false,
            deactivate_members: None,
            get_status: 200,
            get_body: None,
            assigned_reviewers: vec!["reviewer-1".to_string(), "reviewer-2".to_string()],
            reassign_status: 200,
            reassign_wrong_pr: false,
        }
    }
}

/// What the stub has been asked to do.
#[derive(Debug, Default)]
pub(crate) struct StubState {
    pub health_calls: usize,
    pub team_add_calls: usize,
    pub pull_request_create_calls: usize,
    pub activated: Vec<String>,
    pub deactivate_calls: usize,
    pub reassign_calls: usize,
    pub reassigned_from: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    behaviour: Arc<Behaviour>,
    state: Arc<Mutex<StubState>>,
}

pub(crate) struct StubService {
    base_url: String,
    state: Arc<Mutex<StubState>>,
    metrics: MetricsRegistry,
    runtime: tokio::runtime::Runtime,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubService {
    pub fn start(behaviour: Behaviour) -> Self {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(Mutex::new(StubState::default()));
        let app = Router::new()
            .route("/health", get(health))
            .route("/team/add", post(team_add))
            .route("/pullRequest/create", post(pull_request_create))
            .route("/users/setIsActive", post(set_is_active))
            .route("/team/deactivateMembers", post(deactivate_members))
            .route("/pullRequest/get", get(pull_request_get))
            .route("/pullRequest/reassign", post(reassign))
            .with_state(AppState {
                behaviour: Arc::new(behaviour),
                state: state.clone(),
            });

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

        Self {
            base_url,
            state,
            metrics: MetricsRegistry::start().unwrap(),
            runtime: tokio::runtime::Runtime::new().unwrap(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn client(&self) -> ReviewServiceClient {
        ReviewServiceClient::new(&self.base_url, Duration::from_secs(5), self.metrics.clone())
            .unwrap()
    }

    /// Run async client code against the stub from a synchronous test.
    pub fn block_on<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(ReviewServiceClient) -> Fut,
        Fut: Future<Output = T>,
    {
        self.runtime.block_on(f(self.client()))
    }

    pub fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock()
    }
}

impl Drop for StubService {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn nth_status(statuses: &[u16], call: usize) -> StatusCode {
    status(statuses.get(call).or(statuses.last()).copied().unwrap_or(201))
}

fn error_body(code: &str) -> Json<Value> {
    Json(json!({"error": {"code": code, "message": "stubbed failure"}}))
}

async fn health(State(app): State<AppState>) -> StatusCode {
    app.state.lock().health_calls += 1;
    status(app.behaviour.health_status)
}

async fn team_add(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = {
        let mut state = app.state.lock();
        state.team_add_calls += 1;
        state.team_add_calls - 1
    };

    let status = nth_status(&app.behaviour.team_add_statuses, call);
    if status == StatusCode::CREATED {
        (status, Json(json!({ "team": body })))
    } else {
        (status, error_body("TEAM_EXISTS"))
    }
}

async fn pull_request_create(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = {
        let mut state = app.state.lock();
        state.pull_request_create_calls += 1;
        state.pull_request_create_calls - 1
    };

    let status = nth_status(&app.behaviour.pr_create_statuses, call);
    if status == StatusCode::CREATED {
        (status, Json(json!({ "pr": body })))
    } else {
        (status, error_body("PR_EXISTS"))
    }
}

async fn set_is_active(State(app): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    if let Some(user_id) = body["user_id"].as_str() {
        app.state.lock().activated.push(user_id.to_string());
    }
    Json(json!({ "user": body }))
}

async fn deactivate_members(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    app.state.lock().deactivate_calls += 1;

    let status = status(app.behaviour.deactivate_status);
    if status != StatusCode::OK {
        return (status, error_body("INTERNAL"));
    }

    let team_name = if app.behaviour.deactivate_wrong_team {
        "some-other-team"
    } else {
        body["team_name"].as_str().unwrap_or_default()
    };
    (
        status,
        Json(json!({"team": {
            "team_name": team_name,
            "members": app.behaviour.deactivate_members.clone().unwrap_or_else(|| json!([])),
        }})),
    )
}

async fn pull_request_get(
    State(app): State<AppState>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let status = status(app.behaviour.get_status);
    if status != StatusCode::OK {
        return (status, error_body("NOT_FOUND"));
    }

    if let Some(body) = &app.behaviour.get_body {
        return (status, Json(body.clone()));
    }

    let id = query.get("pull_request_id").cloned().unwrap_or_default();
    (
        status,
        Json(json!({"pr": {
            "pull_request_id": id,
            "status": "OPEN",
            "assigned_reviewers": app.behaviour.assigned_reviewers,
        }})),
    )
}

async fn reassign(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    {
        let mut state = app.state.lock();
        state.reassign_calls += 1;
        if let Some(old) = body["old_user_id"].as_str() {
            state.reassigned_from.push(old.to_string());
        }
    }

    let status = status(app.behaviour.reassign_status);
    if status != StatusCode::OK {
        return (status, error_body("NO_CANDIDATE"));
    }

    let id = if app.behaviour.reassign_wrong_pr {
        "some-other-pr"
    } else {
        body["pull_request_id"].as_str().unwrap_or_default()
    };
    (
        status,
        Json(json!({"pr": {"pull_request_id": id, "assigned_reviewers": ["replacement"]}, "replaced_by": "replacement"})),
    )
}
