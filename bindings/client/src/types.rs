use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub team_name: String,
    pub members: Vec<TeamMember>,
}

/// The part of a team response that identifies the team. Member details are not read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamRef {
    pub team_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamResponse {
    pub team: TeamRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatePullRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub pull_request_id: String,
    #[serde(default)]
    pub pull_request_name: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Missing and `null` are both read as no reviewers.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub assigned_reviewers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestResponse {
    /// Missing and `null` are both read as `None`.
    #[serde(default)]
    pub pr: Option<PullRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReassignResponse {
    pub pr: PullRequest,
    #[serde(default)]
    pub replaced_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error.code, self.error.message)
    }
}

#[derive(Serialize)]
pub(crate) struct TeamNameRequest<'a> {
    pub team_name: &'a str,
}

#[derive(Serialize)]
pub(crate) struct ReassignRequest<'a> {
    pub pull_request_id: &'a str,
    pub old_user_id: &'a str,
}

#[derive(Serialize)]
pub(crate) struct SetIsActiveRequest<'a> {
    pub user_id: &'a str,
    pub is_active: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
