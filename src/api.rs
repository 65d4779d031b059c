use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::{info, instrument};

use crate::AppState;
use crate::errors::AppError;
use crate::model::WebhookReply;
use crate::response::ApiResponse;

mod installation;
mod workflow_run;

/// Liveness probe.
///
/// Returns (wrapped in `ApiResponse`)
/// * `{"status": "ok"}` (200)
pub async fn health() -> ApiResponse<JsonValue> {
    ApiResponse::ok(json!({"status": "ok"}))
}

/// Receives GitHub webhook deliveries and dispatches them by event name.
///
/// Parameters
/// * `X-GitHub-Event` header naming the event type
/// * the delivery payload as JSON
///
/// Returns (wrapped in `ApiResponse`)
/// * `WebhookReply` describing what was done with the delivery (200)
/// * `None` if the event header is missing or the payload is malformed (400)
/// * `None` if a submission artifact cannot be parsed (422)
/// * `None` if a GitHub or database call failed (500)
#[instrument(skip(state, headers, payload))]
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> Result<ApiResponse<WebhookReply>, AppError> {
    // TODO: verify the X-Hub-Signature-256 header against the configured
    // webhook secret before trusting the payload.
    let event = headers
        .get("X-GitHub-Event")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing X-GitHub-Event header".to_string()))?;

    info!("Received webhook delivery for event '{}'", event);

    let reply = match event {
        "installation" | "installation_repositories" => {
            installation::handle_installation(&state, payload).await?
        }
        "workflow_run" => workflow_run::handle_workflow_run(&state, payload).await?,
        other => {
            info!("Ignoring unhandled event '{}'", other);
            WebhookReply::ignored_event(other)
        }
    };

    Ok(ApiResponse::ok(reply))
}
