mod client;
mod types;

pub mod prelude {
    pub use crate::client::{ApiResponse, ReviewServiceClient};
    pub use crate::types::{
        CreatePullRequest, ErrorDetail, ErrorResponse, PullRequest, PullRequestResponse,
        ReassignResponse, Team, TeamMember, TeamRef, TeamResponse,
    };

    // Re-exported so that scenarios can match on statuses without depending on reqwest directly.
    pub use reqwest::StatusCode;
}
