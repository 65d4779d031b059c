use crate::errors::AppError;
use crate::model::{Leaderboard, NewLeaderboard, NewSubmission, Submission};
use crate::schema::{leaderboards::dsl as lb_dsl, submissions::dsl as sub_dsl};
use deadpool_diesel::postgres::Pool;
use diesel::prelude::*;
use tracing::{debug, error};

async fn run_query<T, F>(pool: &Pool, query: F) -> Result<T, AppError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().await.map_err(|pool_err| {
        error!(
            "Failed to get DB connection object from pool: {:?}",
            pool_err
        );
        AppError::PoolError(pool_err)
    })?;
    debug!("DB connection object obtained from pool for interaction");

    let res = conn.interact(query).await;

    match res {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(diesel_err)) => {
            error!("Diesel query failed within interaction: {:?}", diesel_err);
            Err(AppError::DieselError(diesel_err))
        }
        Err(interact_err) => {
            error!("Deadpool interact error: {:?}", interact_err);
            Err(AppError::InteractError(interact_err))
        }
    }
}

/// Inserts a leaderboard row and returns it. A second row for the same
/// `github_repo_id` surfaces as a diesel `UniqueViolation`.
pub async fn create_leaderboard(
    pool: &Pool,
    new_leaderboard: NewLeaderboard,
) -> Result<Leaderboard, AppError> {
    run_query(pool, move |conn| {
        diesel::insert_into(lb_dsl::leaderboards)
            .values(&new_leaderboard)
            .get_result::<Leaderboard>(conn)
    })
    .await
}

pub async fn find_leaderboard_by_repo_id(
    pool: &Pool,
    github_repo_id: i64,
) -> Result<Option<Leaderboard>, AppError> {
    run_query(pool, move |conn| {
        lb_dsl::leaderboards
            .filter(lb_dsl::github_repo_id.eq(github_repo_id))
            .first::<Leaderboard>(conn)
            .optional()
    })
    .await
}

/// `repo_full_name` is indexed but not unique; the first match wins.
pub async fn find_leaderboard_by_repo_name(
    pool: &Pool,
    repo_full_name: &str,
) -> Result<Option<Leaderboard>, AppError> {
    let repo_full_name = repo_full_name.to_string();
    run_query(pool, move |conn| {
        lb_dsl::leaderboards
            .filter(lb_dsl::repo_full_name.eq(repo_full_name))
            .first::<Leaderboard>(conn)
            .optional()
    })
    .await
}

/// Refreshes the stored name after a repository rename. Returns the number of
/// rows touched (0 when the repository was never registered).
pub async fn update_leaderboard_repo_name(
    pool: &Pool,
    github_repo_id: i64,
    repo_full_name: &str,
) -> Result<usize, AppError> {
    let repo_full_name = repo_full_name.to_string();
    run_query(pool, move |conn| {
        diesel::update(lb_dsl::leaderboards.filter(lb_dsl::github_repo_id.eq(github_repo_id)))
            .set(lb_dsl::repo_full_name.eq(repo_full_name))
            .execute(conn)
    })
    .await
}

/// Inserts a submission row and returns it. A second row for the same
/// `workflow_run_id` surfaces as a diesel `UniqueViolation`; a `None` status
/// falls back to the column default.
pub async fn create_submission(
    pool: &Pool,
    new_submission: NewSubmission,
) -> Result<Submission, AppError> {
    run_query(pool, move |conn| {
        diesel::insert_into(sub_dsl::submissions)
            .values(&new_submission)
            .get_result::<Submission>(conn)
    })
    .await
}

pub async fn find_submission_by_run_id(
    pool: &Pool,
    workflow_run_id: i64,
) -> Result<Option<Submission>, AppError> {
    run_query(pool, move |conn| {
        sub_dsl::submissions
            .filter(sub_dsl::workflow_run_id.eq(workflow_run_id))
            .first::<Submission>(conn)
            .optional()
    })
    .await
}

/// All submissions recorded against a leaderboard, newest first.
pub async fn list_submissions_for_leaderboard(
    pool: &Pool,
    leaderboard_repo: &str,
) -> Result<Vec<Submission>, AppError> {
    let leaderboard_repo = leaderboard_repo.to_string();
    run_query(pool, move |conn| {
        sub_dsl::submissions
            .filter(sub_dsl::leaderboard_repo.eq(leaderboard_repo))
            .order(sub_dsl::id.desc())
            .load::<Submission>(conn)
    })
    .await
}

/// All submissions currently in the given status, newest first.
pub async fn list_submissions_by_status(
    pool: &Pool,
    status: &str,
) -> Result<Vec<Submission>, AppError> {
    let status = status.to_string();
    run_query(pool, move |conn| {
        sub_dsl::submissions
            .filter(sub_dsl::status.eq(status))
            .order(sub_dsl::id.desc())
            .load::<Submission>(conn)
    })
    .await
}
