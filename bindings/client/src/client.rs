use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use gale_instruments::{MetricsRegistry, OperationRecord};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::types::{
    CreatePullRequest, ErrorResponse, ReassignRequest, SetIsActiveRequest, Team, TeamNameRequest,
};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_EXCERPT_CHARS: usize = 200;

/// Status and raw body of a response from the service.
///
/// Responses are returned whatever their status. Only transport failures such as a refused
/// connection or a timeout are returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("Unexpected response body: {}", self.body_excerpt()))
    }

    /// The start of the body, for logging.
    pub fn body_excerpt(&self) -> &str {
        match self.body.char_indices().nth(BODY_EXCERPT_CHARS) {
            Some((end, _)) => &self.body[..end],
            None => &self.body,
        }
    }

    /// The service's error code and message when the body is an error response, otherwise the
    /// body excerpt.
    pub fn error_summary(&self) -> String {
        match serde_json::from_str::<ErrorResponse>(&self.body) {
            Ok(error) => error.to_string(),
            Err(_) => self.body_excerpt().to_string(),
        }
    }
}

/// Client for the PR reviewer service.
///
/// Every workflow and fixture call is timed and recorded as an operation in the
/// [MetricsRegistry]. A call counts as failed when the transport fails or when the status is not
/// one of the statuses that the operation expects, so an expected conflict does not count against
/// `http_req_failed`.
#[derive(Debug, Clone)]
pub struct ReviewServiceClient {
    http: reqwest::Client,
    base_url: Url,
    metrics: MetricsRegistry,
}

impl ReviewServiceClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        metrics: MetricsRegistry,
    ) -> anyhow::Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        // Keep the last path segment when joining relative paths.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            metrics,
        })
    }

    /// `GET /health`, true when the service answers 200 within five seconds. Not recorded.
    pub async fn health(&self) -> anyhow::Result<bool> {
        let response = self
            .http
            .get(self.url("health")?)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;

        Ok(response.status() == StatusCode::OK)
    }

    /// `POST /team/add`. Created and Conflict are both expected.
    pub async fn add_team(&self, team: &Team) -> anyhow::Result<ApiResponse> {
        self.instrumented(
            "team_add",
            &[StatusCode::CREATED, StatusCode::CONFLICT],
            self.post("team/add", team)?.send(),
        )
        .await
    }

    /// `POST /pullRequest/create`. Created and Conflict are both expected.
    pub async fn create_pull_request(
        &self,
        request: &CreatePullRequest,
    ) -> anyhow::Result<ApiResponse> {
        self.instrumented(
            "pull_request_create",
            &[StatusCode::CREATED, StatusCode::CONFLICT],
            self.post("pullRequest/create", request)?.send(),
        )
        .await
    }

    /// `POST /users/setIsActive`. Best effort, so it is not recorded.
    pub async fn set_is_active(
        &self,
        user_id: &str,
        is_active: bool,
    ) -> anyhow::Result<ApiResponse> {
        let response = self
            .post("users/setIsActive", &SetIsActiveRequest { user_id, is_active })?
            .send()
            .await?;

        read_response(response).await
    }

    /// `POST /team/deactivateMembers`.
    pub async fn deactivate_team_members(&self, team_name: &str) -> anyhow::Result<ApiResponse> {
        self.instrumented(
            "team_deactivate_members",
            &[StatusCode::OK],
            self.post("team/deactivateMembers", &TeamNameRequest { team_name })?
                .send(),
        )
        .await
    }

    /// `GET /pullRequest/get?pull_request_id=..`.
    pub async fn get_pull_request(&self, pull_request_id: &str) -> anyhow::Result<ApiResponse> {
        let mut url = self.url("pullRequest/get")?;
        url.query_pairs_mut()
            .append_pair("pull_request_id", pull_request_id);

        self.instrumented(
            "pull_request_get",
            &[StatusCode::OK],
            self.http.get(url).send(),
        )
        .await
    }

    /// `POST /pullRequest/reassign`. A Conflict means another caller got there first and is
    /// expected.
    pub async fn reassign_reviewer(
        &self,
        pull_request_id: &str,
        old_user_id: &str,
    ) -> anyhow::Result<ApiResponse> {
        self.instrumented(
            "pull_request_reassign",
            &[StatusCode::OK, StatusCode::CONFLICT],
            self.post(
                "pullRequest/reassign",
                &ReassignRequest {
                    pull_request_id,
                    old_user_id,
                },
            )?
            .send(),
        )
        .await
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid request path: {path}"))
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<reqwest::RequestBuilder> {
        Ok(self.http.post(self.url(path)?).json(body))
    }

    async fn instrumented(
        &self,
        operation_id: &str,
        expected: &[StatusCode],
        request: impl Future<Output = reqwest::Result<reqwest::Response>>,
    ) -> anyhow::Result<ApiResponse> {
        let record = OperationRecord::new(operation_id);

        let result = match request.await {
            Ok(response) => read_response(response).await,
            Err(e) => Err(e.into()),
        };

        let is_error = match &result {
            Ok(response) => !expected.contains(&response.status),
            Err(_) => true,
        };
        self.metrics.add_operation(record.finish(is_error));

        result.with_context(|| format!("Request failed: {operation_id}"))
    }
}

async fn read_response(response: reqwest::Response) -> anyhow::Result<ApiResponse> {
    let status = response.status();
    let body = response.text().await?;

    Ok(ApiResponse { status, body })
}
