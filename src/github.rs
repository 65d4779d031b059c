use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Method, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(thiserror::Error, Debug)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("GitHub API returned {status} during {context}: {body}")]
    Api {
        status: StatusCode,
        context: String,
        body: String,
    },
    #[error("GitHub App credentials rejected: {0}")]
    Credentials(#[from] jsonwebtoken::errors::Error),
}

/// A single artifact attached to a workflow run.
#[derive(Deserialize, Debug, Clone)]
pub struct RunArtifact {
    pub id: i64,
    pub name: String,
}

/// The pull request fields callers care about after creation.
#[derive(Deserialize, Debug, Clone)]
pub struct PullRequestInfo {
    pub html_url: String,
    pub number: i32,
}

/// The GitHub REST operations the webhook handlers need, behind a trait so
/// tests can substitute a stub.
#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Checks whether `path` exists in the default branch of `repo`.
    async fn repo_file_exists(
        &self,
        installation_id: i64,
        repo: &str,
        path: &str,
    ) -> Result<bool, GithubError>;

    /// Lists the artifacts uploaded by a workflow run.
    async fn list_run_artifacts(
        &self,
        installation_id: i64,
        repo: &str,
        run_id: i64,
    ) -> Result<Vec<RunArtifact>, GithubError>;

    /// Downloads an artifact as a zip archive.
    async fn download_artifact(
        &self,
        installation_id: i64,
        repo: &str,
        artifact_id: i64,
    ) -> Result<Vec<u8>, GithubError>;

    /// Creates `branch` in `repo`, pointing at the tip of `base`.
    async fn create_branch(
        &self,
        installation_id: i64,
        repo: &str,
        branch: &str,
        base: &str,
    ) -> Result<(), GithubError>;

    /// Commits each `(path, content)` pair to `branch`, one commit per file.
    async fn commit_files(
        &self,
        installation_id: i64,
        repo: &str,
        branch: &str,
        files: &[(String, String)],
        message: &str,
    ) -> Result<(), GithubError>;

    /// Opens a pull request from `head` into `base`.
    async fn create_pull_request(
        &self,
        installation_id: i64,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequestInfo, GithubError>;
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct ArtifactListing {
    artifacts: Vec<RunArtifact>,
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

/// GitHub client authenticating as a GitHub App installation.
///
/// Every operation signs a short-lived app JWT and exchanges it for an
/// installation token, so a stale token can never outlive a request cycle.
pub struct GithubAppClient {
    http: reqwest::Client,
    api_url: Url,
    app_id: String,
    encoding_key: EncodingKey,
}

impl GithubAppClient {
    pub fn new(api_url: Url, app_id: String, private_key_pem: &str) -> Result<Self, GithubError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
        let http = reqwest::Client::builder()
            .user_agent("agentbeats-github-app")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_url,
            app_id,
            encoding_key,
        })
    }

    /// Signs a JWT identifying the app itself. GitHub caps the lifetime at
    /// ten minutes; `iat` is backdated to absorb clock drift.
    fn app_jwt(&self) -> Result<String, GithubError> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.clone(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    async fn installation_token(&self, installation_id: i64) -> Result<String, GithubError> {
        let jwt = self.app_jwt()?;
        let url = self.endpoint(&format!("app/installations/{installation_id}/access_tokens"));
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(header::ACCEPT, GITHUB_ACCEPT)
            .send()
            .await?;
        let response = check_status(response, "installation token exchange").await?;
        let token: TokenResponse = response.json().await?;
        Ok(token.token)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    fn authed(&self, method: Method, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(token)
            .header(header::ACCEPT, GITHUB_ACCEPT)
    }
}

#[async_trait]
impl GithubApi for GithubAppClient {
    async fn repo_file_exists(
        &self,
        installation_id: i64,
        repo: &str,
        path: &str,
    ) -> Result<bool, GithubError> {
        let token = self.installation_token(installation_id).await?;
        let url = self.endpoint(&format!("repos/{repo}/contents/{path}"));
        let response = self.authed(Method::GET, &url, &token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response, "repository content lookup").await?;
        Ok(true)
    }

    async fn list_run_artifacts(
        &self,
        installation_id: i64,
        repo: &str,
        run_id: i64,
    ) -> Result<Vec<RunArtifact>, GithubError> {
        let token = self.installation_token(installation_id).await?;
        let url = self.endpoint(&format!("repos/{repo}/actions/runs/{run_id}/artifacts"));
        let response = self.authed(Method::GET, &url, &token).send().await?;
        let response = check_status(response, "artifact listing").await?;
        let listing: ArtifactListing = response.json().await?;
        debug!(
            "Listed {} artifact(s) for run {} in {}",
            listing.artifacts.len(),
            run_id,
            repo
        );
        Ok(listing.artifacts)
    }

    async fn download_artifact(
        &self,
        installation_id: i64,
        repo: &str,
        artifact_id: i64,
    ) -> Result<Vec<u8>, GithubError> {
        let token = self.installation_token(installation_id).await?;
        let url = self.endpoint(&format!("repos/{repo}/actions/artifacts/{artifact_id}/zip"));
        // GitHub answers with a redirect into blob storage; the client follows it.
        let response = self.authed(Method::GET, &url, &token).send().await?;
        let response = check_status(response, "artifact download").await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn create_branch(
        &self,
        installation_id: i64,
        repo: &str,
        branch: &str,
        base: &str,
    ) -> Result<(), GithubError> {
        let token = self.installation_token(installation_id).await?;
        let ref_url = self.endpoint(&format!("repos/{repo}/git/ref/heads/{base}"));
        let response = self.authed(Method::GET, &ref_url, &token).send().await?;
        let response = check_status(response, "base branch lookup").await?;
        let base_ref: GitRef = response.json().await?;

        let refs_url = self.endpoint(&format!("repos/{repo}/git/refs"));
        let response = self
            .authed(Method::POST, &refs_url, &token)
            .json(&json!({
                "ref": format!("refs/heads/{branch}"),
                "sha": base_ref.object.sha,
            }))
            .send()
            .await?;
        check_status(response, "branch creation").await?;
        debug!("Created branch {} from {} in {}", branch, base, repo);
        Ok(())
    }

    async fn commit_files(
        &self,
        installation_id: i64,
        repo: &str,
        branch: &str,
        files: &[(String, String)],
        message: &str,
    ) -> Result<(), GithubError> {
        let token = self.installation_token(installation_id).await?;
        for (path, content) in files {
            let url = self.endpoint(&format!("repos/{repo}/contents/{path}"));
            let response = self
                .authed(Method::PUT, &url, &token)
                .json(&json!({
                    "message": message,
                    "content": BASE64.encode(content),
                    "branch": branch,
                }))
                .send()
                .await?;
            check_status(response, "file commit").await?;
        }
        debug!("Committed {} file(s) to {} in {}", files.len(), branch, repo);
        Ok(())
    }

    async fn create_pull_request(
        &self,
        installation_id: i64,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequestInfo, GithubError> {
        let token = self.installation_token(installation_id).await?;
        let url = self.endpoint(&format!("repos/{repo}/pulls"));
        let response = self
            .authed(Method::POST, &url, &token)
            .json(&json!({
                "title": title,
                "body": body,
                "head": head,
                "base": base,
            }))
            .send()
            .await?;
        let response = check_status(response, "pull request creation").await?;
        let pr: PullRequestInfo = response.json().await?;
        debug!("Opened pull request #{} in {}", pr.number, repo);
        Ok(pr)
    }
}

async fn check_status(response: Response, context: &str) -> Result<Response, GithubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GithubError::Api {
        status,
        context: context.to_string(),
        body,
    })
}
