use std::io::{Cursor, Read};

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::AppState;
use crate::errors::AppError;
use crate::github::PullRequestInfo;
use crate::model::{Leaderboard, NewSubmission, SubmissionStatus, WebhookReply};
use crate::payloads::{ReferencedWorkflow, SubmissionManifest, WorkflowRunEvent};
use crate::store;

const SUBMISSION_ARTIFACT_NAME: &str = "agentbeats-submission";
const SUBMISSION_BASE_BRANCH: &str = "main";

/// Turns a successful `workflow_run` into a submission pull request on the
/// leaderboard it targeted, and records the outcome.
///
/// A run qualifies when it completed successfully, references the runner
/// workflow of a registered leaderboard, has not been recorded before, and
/// uploaded the submission artifact. The artifact manifest must name the
/// same leaderboard the run executed against, otherwise the submission is
/// rejected.
pub(super) async fn handle_workflow_run(
    state: &AppState,
    payload: JsonValue,
) -> Result<WebhookReply, AppError> {
    let event: WorkflowRunEvent = serde_json::from_value(payload)
        .map_err(|err| AppError::BadRequest(format!("Malformed workflow_run payload: {err}")))?;

    if event.action.as_deref() != Some("completed") {
        return Ok(WebhookReply::ignored("not completed"));
    }

    let run = event.workflow_run.ok_or_else(|| {
        AppError::BadRequest("workflow_run payload is missing the run object".to_string())
    })?;

    if run.conclusion.as_deref() != Some("success") {
        let conclusion = run.conclusion.as_deref().unwrap_or("none");
        info!("Ignoring run {} with conclusion '{}'", run.id, conclusion);
        return Ok(WebhookReply::ignored(format!("conclusion={conclusion}")));
    }

    let purple_repo = event.repository.map(|repository| repository.full_name).ok_or_else(|| {
        AppError::BadRequest("workflow_run payload is missing the repository".to_string())
    })?;

    if run.referenced_workflows.is_empty() {
        info!("Run {} references no reusable workflows", run.id);
        return Ok(WebhookReply::ignored("no reusable workflows"));
    }

    let Some(leaderboard) = find_leaderboard(state, &run.referenced_workflows).await? else {
        info!("Run {} does not reference a registered leaderboard", run.id);
        return Ok(WebhookReply::ignored("no registered leaderboard"));
    };

    if store::find_submission_by_run_id(&state.pool, run.id).await?.is_some() {
        info!("Run {} was already recorded", run.id);
        return Ok(WebhookReply::ignored("duplicate"));
    }

    let installation_id = event.installation.map(|installation| installation.id).ok_or_else(|| {
        AppError::BadRequest("workflow_run payload is missing the installation ID".to_string())
    })?;

    let Some(artifact_data) =
        download_submission_artifact(state, installation_id, &purple_repo, run.id).await?
    else {
        warn!("Run {} from {} uploaded no submission artifact", run.id, purple_repo);
        record_submission(
            state,
            run.id,
            &leaderboard.repo_full_name,
            &purple_repo,
            SubmissionStatus::Failed,
            Some("No artifact found"),
            None,
            None,
        )
        .await?;
        return Ok(WebhookReply::error("no artifact"));
    };

    let artifact = parse_artifact(&artifact_data)?;

    if artifact.manifest.get("target_leaderboard").and_then(JsonValue::as_str)
        != Some(leaderboard.repo_full_name.as_str())
    {
        warn!(
            "Run {} targeted a different leaderboard than {}",
            run.id, leaderboard.repo_full_name
        );
        record_submission(
            state,
            run.id,
            &leaderboard.repo_full_name,
            &purple_repo,
            SubmissionStatus::Rejected,
            Some("Target mismatch"),
            None,
            None,
        )
        .await?;
        return Ok(WebhookReply::rejected("target mismatch"));
    }

    let manifest: SubmissionManifest =
        serde_json::from_value(artifact.manifest.clone()).map_err(|err| {
            AppError::UnprocessableEntity(format!("Incomplete submission manifest: {err}"))
        })?;

    let pr = create_submission_pr(state, &leaderboard, &manifest, &artifact, run.id).await?;

    record_submission(
        state,
        run.id,
        &leaderboard.repo_full_name,
        &purple_repo,
        SubmissionStatus::Submitted,
        None,
        Some(&pr),
        Some(&artifact.results),
    )
    .await?;

    info!(
        "Run {} submitted to {} as {}",
        run.id, leaderboard.repo_full_name, pr.html_url
    );
    Ok(WebhookReply::submitted(pr.html_url))
}

/// Resolves the registered leaderboard a run executed against, from the
/// repositories its referenced workflows live in. First match wins.
async fn find_leaderboard(
    state: &AppState,
    referenced: &[ReferencedWorkflow],
) -> Result<Option<Leaderboard>, AppError> {
    for workflow in referenced {
        // path looks like "owner/repo/.github/workflows/runner.yml@ref"
        let mut parts = workflow.path.splitn(3, '/');
        let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
            continue;
        };
        let repo_full_name = format!("{owner}/{repo}");

        if let Some(leaderboard) =
            store::find_leaderboard_by_repo_name(&state.pool, &repo_full_name).await?
        {
            return Ok(Some(leaderboard));
        }
    }
    Ok(None)
}

/// Downloads the submission artifact a run uploaded, if any.
async fn download_submission_artifact(
    state: &AppState,
    installation_id: i64,
    repo: &str,
    run_id: i64,
) -> Result<Option<Vec<u8>>, AppError> {
    let artifacts = state
        .github
        .list_run_artifacts(installation_id, repo, run_id)
        .await?;

    for artifact in artifacts {
        if artifact.name == SUBMISSION_ARTIFACT_NAME {
            let data = state
                .github
                .download_artifact(installation_id, repo, artifact.id)
                .await?;
            return Ok(Some(data));
        }
    }

    Ok(None)
}

struct SubmissionArtifact {
    results: JsonValue,
    manifest: JsonValue,
    scenario: String,
}

/// Extracts `results.json`, `manifest.json` and `scenario.toml` from the
/// artifact zip. Entries may sit under a directory prefix, so matching is by
/// file name suffix. Absent entries keep empty defaults.
fn parse_artifact(artifact_zip: &[u8]) -> Result<SubmissionArtifact, AppError> {
    let mut archive = ZipArchive::new(Cursor::new(artifact_zip)).map_err(|err| {
        AppError::UnprocessableEntity(format!("Unreadable submission artifact: {err}"))
    })?;

    let mut results = json!({});
    let mut manifest = json!({});
    let mut scenario = String::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| {
            AppError::UnprocessableEntity(format!("Unreadable submission artifact: {err}"))
        })?;
        let name = entry.name().to_string();

        let wants_json = name.ends_with("results.json") || name.ends_with("manifest.json");
        if !wants_json && !name.ends_with("scenario.toml") {
            continue;
        }

        let mut raw = String::new();
        entry.read_to_string(&mut raw).map_err(|err| {
            AppError::UnprocessableEntity(format!("Unreadable {name} in artifact: {err}"))
        })?;

        if !wants_json {
            scenario = raw;
        } else {
            let value: JsonValue = serde_json::from_str(&raw).map_err(|err| {
                AppError::UnprocessableEntity(format!("Invalid JSON in {name}: {err}"))
            })?;
            if name.ends_with("results.json") {
                results = value;
            } else {
                manifest = value;
            }
        }
    }

    Ok(SubmissionArtifact {
        results,
        manifest,
        scenario,
    })
}

/// Opens the submission pull request on the leaderboard: a fresh branch off
/// `main`, one directory per submission, three files, one PR.
async fn create_submission_pr(
    state: &AppState,
    leaderboard: &Leaderboard,
    manifest: &SubmissionManifest,
    artifact: &SubmissionArtifact,
    run_id: i64,
) -> Result<PullRequestInfo, AppError> {
    let purple_owner = &manifest.purple_agent_owner;
    // "2025-11-04T09:30:21Z" becomes the path segment "2025-11-04-09-3".
    let timestamp: String = manifest
        .timestamp
        .replace(':', "-")
        .replace('T', "-")
        .chars()
        .take(15)
        .collect();
    let branch_name = format!("agentbeats/submission-{run_id}");
    let submission_path = format!("submissions/{purple_owner}/{timestamp}");

    state
        .github
        .create_branch(
            leaderboard.installation_id,
            &leaderboard.repo_full_name,
            &branch_name,
            SUBMISSION_BASE_BRANCH,
        )
        .await?;

    let pretty = |value: &JsonValue| {
        serde_json::to_string_pretty(value).map_err(|err| AppError::Internal(err.into()))
    };

    let files = vec![
        (format!("{submission_path}/results.json"), pretty(&artifact.results)?),
        (format!("{submission_path}/manifest.json"), pretty(&artifact.manifest)?),
        (format!("{submission_path}/scenario.toml"), artifact.scenario.clone()),
    ];

    state
        .github
        .commit_files(
            leaderboard.installation_id,
            &leaderboard.repo_full_name,
            &branch_name,
            &files,
            &format!("[AgentBeats] Submission from {purple_owner}"),
        )
        .await?;

    let pr = state
        .github
        .create_pull_request(
            leaderboard.installation_id,
            &leaderboard.repo_full_name,
            &branch_name,
            SUBMISSION_BASE_BRANCH,
            &format!("[Submission] {purple_owner}"),
            &format_pr_body(manifest, &artifact.results)?,
        )
        .await?;

    Ok(pr)
}

fn format_pr_body(manifest: &SubmissionManifest, results: &JsonValue) -> Result<String, AppError> {
    let results_pretty =
        serde_json::to_string_pretty(results).map_err(|err| AppError::Internal(err.into()))?;

    Ok(format!(
        r#"## AgentBeats Submission

| Field | Value |
|-------|-------|
| **Competitor** | @{owner} |
| **Repository** | [{repo}](https://github.com/{repo}) |
| **Workflow Run** | [#{run_id}]({run_url}) |

### Results
```json
{results_pretty}
```

---
*Auto-generated by [AgentBeats](https://agentbeats.dev)*
"#,
        owner = manifest.purple_agent_owner,
        repo = manifest.purple_agent_repo,
        run_id = manifest.run_id,
        run_url = manifest.run_url,
    ))
}

/// Persists the outcome of a processed run. A concurrent delivery racing us
/// to the same run id counts as already recorded.
async fn record_submission(
    state: &AppState,
    run_id: i64,
    leaderboard_repo: &str,
    purple_repo: &str,
    status: SubmissionStatus,
    error_message: Option<&str>,
    pr: Option<&PullRequestInfo>,
    results: Option<&JsonValue>,
) -> Result<(), AppError> {
    let new_submission = NewSubmission {
        workflow_run_id: run_id,
        leaderboard_repo: leaderboard_repo.to_string(),
        purple_repo: purple_repo.to_string(),
        purple_owner: purple_repo.split('/').next().unwrap_or_default().to_string(),
        pr_number: pr.map(|pr| pr.number),
        pr_url: pr.map(|pr| pr.html_url.clone()),
        results_json: results.cloned(),
        status: Some(status.as_str().to_string()),
        error_message: error_message.map(str::to_string),
    };

    match store::create_submission(&state.pool, new_submission).await {
        Ok(submission) => {
            debug!("Recorded submission {} for run {}", submission.id, run_id);
            Ok(())
        }
        Err(AppError::DieselError(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _,
        ))) => {
            warn!("Run {} was already recorded by a concurrent delivery", run_id);
            Ok(())
        }
        Err(err) => Err(err),
    }
}
