use crate::schema::leaderboards;
use crate::schema::submissions;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Deserialize, Serialize, Debug, Clone, Queryable)]
pub struct Leaderboard {
    pub id: i32,
    pub github_repo_id: i64,
    pub repo_full_name: String,
    pub installation_id: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = leaderboards)]
pub struct NewLeaderboard {
    pub github_repo_id: i64,
    pub repo_full_name: String,
    pub installation_id: i64,
    // created_at has a DB default (NOW())
}

#[derive(Deserialize, Serialize, Debug, Clone, Queryable)]
pub struct Submission {
    pub id: i32,
    pub workflow_run_id: i64,
    pub leaderboard_repo: String,
    pub purple_repo: String,
    pub purple_owner: String,
    pub pr_number: Option<i32>,
    pub pr_url: Option<String>,
    pub results_json: Option<JsonValue>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = submissions)]
pub struct NewSubmission {
    pub workflow_run_id: i64,
    pub leaderboard_repo: String,
    pub purple_repo: String,
    pub purple_owner: String,
    pub pr_number: Option<i32>,
    pub pr_url: Option<String>,
    pub results_json: Option<JsonValue>,
    // a None status falls back to the DB default ('pending')
    pub status: Option<String>,
    pub error_message: Option<String>,
    // created_at has a DB default (NOW())
}

/// Lifecycle states written to `submissions.status`. The column itself is an
/// open string; this is the vocabulary the handlers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    Failed,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

/// Outcome label returned to GitHub for a processed webhook delivery.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Ok,
    Ignored,
    Error,
    Rejected,
}

/// Body of every webhook reply. Only the fields relevant to the outcome are
/// serialized.
#[derive(Deserialize, Serialize, Debug)]
pub struct WebhookReply {
    pub status: WebhookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl WebhookReply {
    fn with_status(status: WebhookStatus) -> Self {
        WebhookReply {
            status,
            reason: None,
            event: None,
            registered: None,
            pr_url: None,
        }
    }

    /// Delivery was understood but intentionally not acted on.
    pub fn ignored(reason: impl Into<String>) -> Self {
        WebhookReply {
            reason: Some(reason.into()),
            ..Self::with_status(WebhookStatus::Ignored)
        }
    }

    /// Delivery for an event type this app does not handle.
    pub fn ignored_event(event: impl Into<String>) -> Self {
        WebhookReply {
            event: Some(event.into()),
            ..Self::with_status(WebhookStatus::Ignored)
        }
    }

    /// Installation processed; lists the repositories registered this time.
    pub fn registered(repos: Vec<String>) -> Self {
        WebhookReply {
            registered: Some(repos),
            ..Self::with_status(WebhookStatus::Ok)
        }
    }

    /// Workflow run turned into a pull request on the leaderboard.
    pub fn submitted(pr_url: impl Into<String>) -> Self {
        WebhookReply {
            pr_url: Some(pr_url.into()),
            ..Self::with_status(WebhookStatus::Ok)
        }
    }

    /// Submission was recognized but rejected on content grounds.
    pub fn rejected(reason: impl Into<String>) -> Self {
        WebhookReply {
            reason: Some(reason.into()),
            ..Self::with_status(WebhookStatus::Rejected)
        }
    }

    /// Submission failed in a way worth recording, e.g. a missing artifact.
    pub fn error(reason: impl Into<String>) -> Self {
        WebhookReply {
            reason: Some(reason.into()),
            ..Self::with_status(WebhookStatus::Error)
        }
    }
}
