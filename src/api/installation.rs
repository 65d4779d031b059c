use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::errors::AppError;
use crate::model::{NewLeaderboard, WebhookReply};
use crate::payloads::InstallationEvent;
use crate::store;

const RUNNER_WORKFLOW_PATH: &str = ".github/workflows/runner.yml";

/// Registers leaderboard repositories when the app is installed on them.
///
/// A repository counts as a leaderboard when it carries the runner workflow
/// at `.github/workflows/runner.yml`. Forks are never registered. A known
/// repository that reappears under a new name has its stored name refreshed
/// instead of being registered twice.
pub(super) async fn handle_installation(
    state: &AppState,
    payload: JsonValue,
) -> Result<WebhookReply, AppError> {
    let event: InstallationEvent = serde_json::from_value(payload)
        .map_err(|err| AppError::BadRequest(format!("Malformed installation payload: {err}")))?;

    let action = event.action.as_deref().unwrap_or("none");
    if action != "created" && action != "added" {
        info!("Ignoring installation event with action '{}'", action);
        return Ok(WebhookReply::ignored(format!("action={action}")));
    }

    let installation_id = event.installation.map(|installation| installation.id).ok_or_else(|| {
        AppError::BadRequest("Installation payload is missing the installation ID".to_string())
    })?;

    let Some(repos) = event.repositories.or(event.repositories_added) else {
        info!("Installation event carried no repository list");
        return Ok(WebhookReply::ignored("no repositories"));
    };

    let mut registered = Vec::new();

    for repo in repos {
        if repo.fork {
            debug!("Skipping fork {}", repo.full_name);
            continue;
        }

        if !is_leaderboard_repo(state, installation_id, &repo.full_name).await {
            debug!("Skipping {} without a runner workflow", repo.full_name);
            continue;
        }

        if let Some(existing) = store::find_leaderboard_by_repo_id(&state.pool, repo.id).await? {
            if existing.repo_full_name != repo.full_name {
                info!(
                    "Leaderboard {} was renamed to {}, updating record",
                    existing.repo_full_name, repo.full_name
                );
                store::update_leaderboard_repo_name(&state.pool, repo.id, &repo.full_name).await?;
            }
            continue;
        }

        let new_leaderboard = NewLeaderboard {
            github_repo_id: repo.id,
            repo_full_name: repo.full_name.clone(),
            installation_id,
        };

        match store::create_leaderboard(&state.pool, new_leaderboard).await {
            Ok(leaderboard) => {
                info!(
                    "Registered leaderboard {} (repo_id: {})",
                    leaderboard.repo_full_name, leaderboard.github_repo_id
                );
                registered.push(repo.full_name);
            }
            Err(AppError::DieselError(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            ))) => {
                // Lost a race against a concurrent delivery for the same repo.
                warn!("Leaderboard {} was already registered", repo.full_name);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(WebhookReply::registered(registered))
}

/// A repository is a leaderboard when the runner workflow file exists in it.
/// GitHub lookup failures count as "not a leaderboard".
async fn is_leaderboard_repo(state: &AppState, installation_id: i64, repo: &str) -> bool {
    match state
        .github
        .repo_file_exists(installation_id, repo, RUNNER_WORKFLOW_PATH)
        .await
    {
        Ok(exists) => exists,
        Err(err) => {
            warn!("Runner workflow check failed for {}: {}", repo, err);
            false
        }
    }
}
