use std::sync::Arc;

use crate::cli::Args;
use crate::github::{GithubApi, GithubAppClient};
use anyhow::{Context, anyhow};
use axum::Router;
use axum::routing::{get, post};
use deadpool_diesel::Runtime;
use deadpool_diesel::postgres::{Manager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

pub mod cli;
pub mod errors;
pub mod github;
pub mod model;
pub mod payloads;
pub mod response;
pub mod schema;
pub mod store;

mod api;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// State shared by all handlers: the connection pool and the GitHub client.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub github: Arc<dyn GithubApi>,
}

pub async fn init_router(args: &Args) -> anyhow::Result<Router> {
    info!("Initializing database pool...");
    let pool = init_pool(&args.connection_str, args.db_pool_max_size)
        .context("Failed to initialize database pool")?;

    info!("Running pending database migrations...");
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Initializing GitHub App client...");
    let github = GithubAppClient::new(
        args.github_api_url.clone(),
        args.github_app_id.clone(),
        &args.github_private_key,
    )
    .context("Failed to initialize GitHub App client")?;

    info!("Initializing router...");
    Ok(init_router_internal(pool, Arc::new(github)))
}

pub fn init_test_router(pool: Pool, github: Arc<dyn GithubApi>) -> Router {
    init_router_internal(pool, github)
}

fn init_router_internal(pool: Pool, github: Arc<dyn GithubApi>) -> Router {
    let state = AppState { pool, github };

    Router::new()
        .route("/health", get(api::health))
        .route("/api/webhooks/github", post(api::github_webhook))
        .with_state(state)
}

fn init_pool(conn_str: &str, max_size: u32) -> anyhow::Result<Pool> {
    let manager = Manager::new(conn_str, Runtime::Tokio1);
    let pool = Pool::builder(manager).max_size(max_size as usize).build()?;
    Ok(pool)
}

/// Applies pending embedded migrations. Safe to run on every startup since
/// already-applied migrations are skipped.
pub async fn run_migrations(pool: &Pool) -> anyhow::Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get connection for migrations")?;

    let applied = conn
        .interact(|conn_sync| {
            conn_sync
                .run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.len())
                .map_err(|err| anyhow!("{err}"))
        })
        .await
        .map_err(|err| anyhow!("Migration interaction failed: {err}"))??;

    info!("Applied {} pending migration(s)", applied);
    Ok(())
}
