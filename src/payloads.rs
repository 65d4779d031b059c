use serde::Deserialize;

/// `installation` / `installation_repositories` event body. Fields the
/// handler inspects lazily stay optional so that deliveries for unrelated
/// actions still parse.
#[derive(Deserialize, Debug)]
pub struct InstallationEvent {
    pub action: Option<String>,
    pub installation: Option<InstallationRef>,
    pub repositories: Option<Vec<RepositorySummary>>,
    pub repositories_added: Option<Vec<RepositorySummary>>,
}

#[derive(Deserialize, Debug)]
pub struct InstallationRef {
    pub id: i64,
}

#[derive(Deserialize, Debug)]
pub struct RepositorySummary {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub fork: bool,
}

/// `workflow_run` event body.
#[derive(Deserialize, Debug)]
pub struct WorkflowRunEvent {
    pub action: Option<String>,
    pub workflow_run: Option<WorkflowRun>,
    pub repository: Option<RepositoryRef>,
    pub installation: Option<InstallationRef>,
}

#[derive(Deserialize, Debug)]
pub struct WorkflowRun {
    pub id: i64,
    pub conclusion: Option<String>,
    #[serde(default)]
    pub referenced_workflows: Vec<ReferencedWorkflow>,
}

#[derive(Deserialize, Debug)]
pub struct ReferencedWorkflow {
    pub path: String,
}

#[derive(Deserialize, Debug)]
pub struct RepositoryRef {
    pub full_name: String,
}

/// Typed view of the `manifest.json` carried in a submission artifact,
/// required once a pull request is actually assembled from it.
#[derive(Deserialize, Debug)]
pub struct SubmissionManifest {
    pub purple_agent_owner: String,
    pub purple_agent_repo: String,
    pub run_id: i64,
    pub run_url: String,
    pub timestamp: String,
    pub target_leaderboard: Option<String>,
}
