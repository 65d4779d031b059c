use agentbeats_github_app::model::{WebhookReply, WebhookStatus};
use agentbeats_github_app::response::ApiResponse;
use agentbeats_github_app::store;
use axum::http::StatusCode;
use axum_test::TestResponse;
use serde_json::{Value, json};
use std::sync::Arc;

mod helpers;
use helpers::{
    StubGithub, TestServer, build_submission_artifact, create_test_leaderboard,
    create_test_submission, setup_test_environment, setup_test_environment_with_github, unique_id,
};

async fn post_webhook(server: &TestServer, event: &str, payload: &Value) -> TestResponse {
    server
        .post("/api/webhooks/github")
        .add_header("X-GitHub-Event", event)
        .json(payload)
        .await
}

/// Payload of a completed, successful `workflow_run` delivery that referenced
/// the given leaderboard's runner workflow.
fn workflow_run_payload(run_id: i64, leaderboard_repo: &str, installation_id: i64) -> Value {
    json!({
        "action": "completed",
        "workflow_run": {
            "id": run_id,
            "conclusion": "success",
            "referenced_workflows": [
                {"path": format!("{leaderboard_repo}/.github/workflows/runner.yml@refs/heads/main")}
            ],
        },
        "repository": {"full_name": "purple-org/agent"},
        "installation": {"id": installation_id},
    })
}

fn submission_manifest(run_id: i64, target: &str) -> Value {
    json!({
        "purple_agent_owner": "purple-org",
        "purple_agent_repo": "purple-org/agent",
        "run_id": run_id,
        "run_url": format!("https://github.com/purple-org/agent/actions/runs/{run_id}"),
        "timestamp": "2025-11-04T09:30:21Z",
        "target_leaderboard": target,
    })
}

// health

#[tokio::test]
async fn test_health_check_ok() {
    let (server, _pool) = setup_test_environment().await;

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json();
    assert_eq!(body.status_code, 200);
    assert_eq!(body.data, Some(json!({"status": "ok"})));
}

// webhook dispatch

#[tokio::test]
async fn test_webhook_without_event_header_is_bad_request() {
    let (server, _pool) = setup_test_environment().await;

    let response = server.post("/api/webhooks/github").json(&json!({})).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_unknown_event_is_acknowledged() {
    let (server, _pool) = setup_test_environment().await;

    let response = post_webhook(&server, "push", &json!({"ref": "refs/heads/main"})).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.event.as_deref(), Some("push"));
}

// installation

#[tokio::test]
async fn test_installation_registers_runner_repositories() {
    let repo_id = unique_id();
    let repo_name = format!("acme/arena-{repo_id}");
    let github = StubGithub::with_runner_repo(&repo_name);
    let (server, pool) = setup_test_environment_with_github(github.clone()).await;

    let payload = json!({
        "action": "created",
        "installation": {"id": 501},
        "repositories": [{"id": repo_id, "full_name": repo_name, "fork": false}],
    });
    let response = post_webhook(&server, "installation", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ok);
    assert_eq!(reply.registered, Some(vec![repo_name.clone()]));

    let board = store::find_leaderboard_by_repo_id(&pool, repo_id)
        .await
        .unwrap()
        .expect("leaderboard should be registered");
    assert_eq!(board.repo_full_name, repo_name);
    assert_eq!(board.installation_id, 501);

    let checks = github.file_checks.lock().unwrap();
    assert_eq!(
        *checks,
        vec![(501, repo_name, ".github/workflows/runner.yml".to_string())]
    );
}

#[tokio::test]
async fn test_installation_skips_forks_and_repos_without_runner() {
    let fork_id = unique_id();
    let plain_id = unique_id();
    let fork_name = format!("acme/fork-{fork_id}");
    let plain_name = format!("acme/tools-{plain_id}");
    let github = Arc::new(StubGithub::default());
    let (server, pool) = setup_test_environment_with_github(github.clone()).await;

    let payload = json!({
        "action": "created",
        "installation": {"id": 501},
        "repositories": [
            {"id": fork_id, "full_name": fork_name, "fork": true},
            {"id": plain_id, "full_name": plain_name, "fork": false},
        ],
    });
    let response = post_webhook(&server, "installation", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    assert_eq!(body.data.expect("response data").registered, Some(vec![]));

    assert!(
        store::find_leaderboard_by_repo_id(&pool, fork_id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store::find_leaderboard_by_repo_id(&pool, plain_id)
            .await
            .unwrap()
            .is_none()
    );

    // Forks never even get the runner workflow lookup.
    let checks = github.file_checks.lock().unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].1, plain_name);
}

#[tokio::test]
async fn test_installation_repositories_added_registers() {
    let repo_id = unique_id();
    let repo_name = format!("acme/arena-{repo_id}");
    let github = StubGithub::with_runner_repo(&repo_name);
    let (server, pool) = setup_test_environment_with_github(github).await;

    let payload = json!({
        "action": "added",
        "installation": {"id": 502},
        "repositories_added": [{"id": repo_id, "full_name": repo_name, "fork": false}],
    });
    let response = post_webhook(&server, "installation_repositories", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    assert_eq!(
        body.data.expect("response data").registered,
        Some(vec![repo_name])
    );

    assert!(
        store::find_leaderboard_by_repo_id(&pool, repo_id)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_installation_rename_refreshes_stored_name() {
    let repo_id = unique_id();
    let old_name = format!("acme/old-{repo_id}");
    let new_name = format!("acme/new-{repo_id}");
    let github = StubGithub::with_runner_repo(&new_name);
    let (server, pool) = setup_test_environment_with_github(github).await;
    create_test_leaderboard(&pool, repo_id, &old_name, 501).await;

    let payload = json!({
        "action": "created",
        "installation": {"id": 501},
        "repositories": [{"id": repo_id, "full_name": new_name, "fork": false}],
    });
    let response = post_webhook(&server, "installation", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    // A rename refreshes the record without reporting a new registration.
    assert_eq!(body.data.expect("response data").registered, Some(vec![]));

    let board = store::find_leaderboard_by_repo_id(&pool, repo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(board.repo_full_name, new_name);
}

#[tokio::test]
async fn test_installation_redelivery_keeps_single_record() {
    let repo_id = unique_id();
    let repo_name = format!("acme/arena-{repo_id}");
    let github = StubGithub::with_runner_repo(&repo_name);
    let (server, pool) = setup_test_environment_with_github(github).await;
    let existing_id = create_test_leaderboard(&pool, repo_id, &repo_name, 501).await;

    let payload = json!({
        "action": "created",
        "installation": {"id": 501},
        "repositories": [{"id": repo_id, "full_name": repo_name, "fork": false}],
    });
    let response = post_webhook(&server, "installation", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    assert_eq!(body.data.expect("response data").registered, Some(vec![]));

    let board = store::find_leaderboard_by_repo_id(&pool, repo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(board.id, existing_id);
    assert_eq!(board.repo_full_name, repo_name);
}

#[tokio::test]
async fn test_installation_unhandled_action_is_ignored() {
    let (server, _pool) = setup_test_environment().await;

    let response = post_webhook(&server, "installation", &json!({"action": "deleted"})).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("action=deleted"));
}

#[tokio::test]
async fn test_installation_without_repositories_is_ignored() {
    let (server, _pool) = setup_test_environment().await;

    let payload = json!({"action": "created", "installation": {"id": 501}});
    let response = post_webhook(&server, "installation", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("no repositories"));
}

// workflow_run

#[tokio::test]
async fn test_workflow_run_opens_submission_pull_request() {
    let repo_id = unique_id();
    let run_id = unique_id();
    let board = format!("acme/arena-{repo_id}");
    let github = Arc::new(StubGithub::default());
    let results = json!({"score": 0.87, "rounds": 3});
    let manifest = submission_manifest(run_id, &board);
    github.add_artifact(
        4401,
        "agentbeats-submission",
        build_submission_artifact(&manifest, &results, "[scenario]\nname = \"demo\"\n"),
    );
    let (server, pool) = setup_test_environment_with_github(github.clone()).await;
    create_test_leaderboard(&pool, repo_id, &board, 501).await;

    let payload = workflow_run_payload(run_id, &board, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ok);
    assert_eq!(
        reply.pr_url.as_deref(),
        Some(format!("https://github.com/{board}/pull/7").as_str())
    );

    let stored = store::find_submission_by_run_id(&pool, run_id)
        .await
        .unwrap()
        .expect("submission should be recorded");
    assert_eq!(stored.status, "submitted");
    assert_eq!(stored.leaderboard_repo, board);
    assert_eq!(stored.purple_repo, "purple-org/agent");
    assert_eq!(stored.purple_owner, "purple-org");
    assert_eq!(stored.pr_number, Some(7));
    assert_eq!(
        stored.pr_url.as_deref(),
        Some(format!("https://github.com/{board}/pull/7").as_str())
    );
    assert_eq!(stored.results_json, Some(results));
    assert_eq!(stored.error_message, None);

    let branch = format!("agentbeats/submission-{run_id}");
    let branches = github.branches.lock().unwrap();
    assert_eq!(
        *branches,
        vec![(board.clone(), branch.clone(), "main".to_string())]
    );

    let commits = github.commits.lock().unwrap();
    assert_eq!(commits.len(), 1);
    let (commit_repo, commit_branch, files, message) = &commits[0];
    assert_eq!(commit_repo, &board);
    assert_eq!(commit_branch, &branch);
    assert_eq!(message, "[AgentBeats] Submission from purple-org");
    let paths: Vec<&str> = files.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "submissions/purple-org/2025-11-04-09-3/results.json",
            "submissions/purple-org/2025-11-04-09-3/manifest.json",
            "submissions/purple-org/2025-11-04-09-3/scenario.toml",
        ]
    );
    assert_eq!(files[2].1, "[scenario]\nname = \"demo\"\n");

    let pulls = github.pull_requests.lock().unwrap();
    assert_eq!(pulls.len(), 1);
    let (pr_repo, head, base, title, pr_body) = &pulls[0];
    assert_eq!(pr_repo, &board);
    assert_eq!(head, &branch);
    assert_eq!(base, "main");
    assert_eq!(title, "[Submission] purple-org");
    assert!(pr_body.contains("## AgentBeats Submission"));
    assert!(pr_body.contains("@purple-org"));
    assert!(pr_body.contains(&format!(
        "https://github.com/purple-org/agent/actions/runs/{run_id}"
    )));
}

#[tokio::test]
async fn test_workflow_run_incomplete_action_is_ignored() {
    let (server, _pool) = setup_test_environment().await;

    let response = post_webhook(&server, "workflow_run", &json!({"action": "requested"})).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("not completed"));
}

#[tokio::test]
async fn test_workflow_run_failed_conclusion_is_ignored() {
    let (server, _pool) = setup_test_environment().await;

    let payload = json!({
        "action": "completed",
        "workflow_run": {"id": unique_id(), "conclusion": "failure"},
    });
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("conclusion=failure"));
}

#[tokio::test]
async fn test_workflow_run_without_reusable_workflows_is_ignored() {
    let (server, _pool) = setup_test_environment().await;

    let payload = json!({
        "action": "completed",
        "workflow_run": {"id": unique_id(), "conclusion": "success"},
        "repository": {"full_name": "purple-org/agent"},
    });
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("no reusable workflows"));
}

#[tokio::test]
async fn test_workflow_run_for_unregistered_leaderboard_is_ignored() {
    let ghost = format!("acme/ghost-{}", unique_id());
    let (server, _pool) = setup_test_environment().await;

    let payload = workflow_run_payload(unique_id(), &ghost, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("no registered leaderboard"));
}

#[tokio::test]
async fn test_workflow_run_duplicate_delivery_is_ignored() {
    let repo_id = unique_id();
    let run_id = unique_id();
    let board = format!("acme/arena-{repo_id}");
    let (server, pool) = setup_test_environment().await;
    create_test_leaderboard(&pool, repo_id, &board, 501).await;
    create_test_submission(&pool, run_id, &board, Some("submitted")).await;

    let payload = workflow_run_payload(run_id, &board, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Ignored);
    assert_eq!(reply.reason.as_deref(), Some("duplicate"));
}

#[tokio::test]
async fn test_workflow_run_without_artifact_records_failure() {
    let repo_id = unique_id();
    let run_id = unique_id();
    let board = format!("acme/arena-{repo_id}");
    let github = Arc::new(StubGithub::default());
    let (server, pool) = setup_test_environment_with_github(github.clone()).await;
    create_test_leaderboard(&pool, repo_id, &board, 501).await;

    let payload = workflow_run_payload(run_id, &board, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Error);
    assert_eq!(reply.reason.as_deref(), Some("no artifact"));

    let stored = store::find_submission_by_run_id(&pool, run_id)
        .await
        .unwrap()
        .expect("failure should be recorded");
    assert_eq!(stored.status, "failed");
    assert_eq!(stored.error_message.as_deref(), Some("No artifact found"));
    assert_eq!(stored.pr_url, None);
    assert_eq!(stored.results_json, None);

    let pulls = github.pull_requests.lock().unwrap();
    assert!(pulls.is_empty());
}

#[tokio::test]
async fn test_workflow_run_target_mismatch_is_rejected() {
    let repo_id = unique_id();
    let run_id = unique_id();
    let board = format!("acme/arena-{repo_id}");
    let github = Arc::new(StubGithub::default());
    let manifest = submission_manifest(run_id, "acme/some-other-arena");
    github.add_artifact(
        4402,
        "agentbeats-submission",
        build_submission_artifact(&manifest, &json!({"score": 0.1}), ""),
    );
    let (server, pool) = setup_test_environment_with_github(github.clone()).await;
    create_test_leaderboard(&pool, repo_id, &board, 501).await;

    let payload = workflow_run_payload(run_id, &board, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<WebhookReply> = response.json();
    let reply = body.data.expect("response data");
    assert_eq!(reply.status, WebhookStatus::Rejected);
    assert_eq!(reply.reason.as_deref(), Some("target mismatch"));

    let stored = store::find_submission_by_run_id(&pool, run_id)
        .await
        .unwrap()
        .expect("rejection should be recorded");
    assert_eq!(stored.status, "rejected");
    assert_eq!(stored.error_message.as_deref(), Some("Target mismatch"));

    // Nothing was pushed to the leaderboard.
    assert!(github.branches.lock().unwrap().is_empty());
    assert!(github.commits.lock().unwrap().is_empty());
    assert!(github.pull_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_workflow_run_corrupt_artifact_is_unprocessable() {
    let repo_id = unique_id();
    let run_id = unique_id();
    let board = format!("acme/arena-{repo_id}");
    let github = Arc::new(StubGithub::default());
    github.add_artifact(4403, "agentbeats-submission", b"not a zip archive".to_vec());
    let (server, pool) = setup_test_environment_with_github(github).await;
    create_test_leaderboard(&pool, repo_id, &board, 501).await;

    let payload = workflow_run_payload(run_id, &board, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(
        store::find_submission_by_run_id(&pool, run_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_workflow_run_incomplete_manifest_is_unprocessable() {
    let repo_id = unique_id();
    let run_id = unique_id();
    let board = format!("acme/arena-{repo_id}");
    let github = Arc::new(StubGithub::default());
    // The target matches but the manifest lacks the fields needed for a PR.
    let manifest = json!({
        "purple_agent_owner": "purple-org",
        "target_leaderboard": board,
    });
    github.add_artifact(
        4404,
        "agentbeats-submission",
        build_submission_artifact(&manifest, &json!({}), ""),
    );
    let (server, pool) = setup_test_environment_with_github(github).await;
    create_test_leaderboard(&pool, repo_id, &board, 501).await;

    let payload = workflow_run_payload(run_id, &board, 501);
    let response = post_webhook(&server, "workflow_run", &payload).await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(
        store::find_submission_by_run_id(&pool, run_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_workflow_run_without_run_object_is_bad_request() {
    let (server, _pool) = setup_test_environment().await;

    let response = post_webhook(&server, "workflow_run", &json!({"action": "completed"})).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}
