use super::model::SubmitClaim;
use crate::model::{App, Batch, BatchState, Platform};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);
    // Every connection to :memory: is its own database.
    let max_connections = if in_memory { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure its parent
/// directory exists. Other URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn lookup_app(pool: &Pool, name: &str) -> Result<Option<App>> {
    let row = sqlx::query("SELECT id, name FROM apps WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| App {
        id: r.get("id"),
        name: r.get("name"),
    }))
}

#[instrument(skip_all)]
pub async fn lookup_platform(pool: &Pool, name: &str) -> Result<Option<Platform>> {
    let row = sqlx::query("SELECT id, name FROM platforms WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Platform {
        id: r.get("id"),
        name: r.get("name"),
    }))
}

/// Insert an app, returning the existing id if the name is taken.
#[instrument(skip_all)]
pub async fn register_app(pool: &Pool, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO apps (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM apps WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Insert a platform, returning the existing id if the name is taken.
#[instrument(skip_all)]
pub async fn register_platform(pool: &Pool, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO platforms (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM platforms WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Create a batch in INIT with zero jobs.
#[instrument(skip_all)]
pub async fn insert_batch(
    pool: &Pool,
    user_id: i64,
    app_id: i64,
    name: &str,
    create_time: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO batches (user_id, create_time, name, app_id, njobs, state) VALUES (?, ?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(create_time)
    .bind(name)
    .bind(app_id)
    .bind(BatchState::Init.as_str())
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

const BATCH_COLUMNS: &str =
    "id, user_id, create_time, name, app_id, njobs, state, submitted_at";

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let id: i64 = row.get("id");
    let state_str: String = row.get("state");
    let state = BatchState::parse_state(&state_str)
        .ok_or_else(|| anyhow!("batch {} has unknown state {}", id, state_str))?;
    Ok(Batch {
        id,
        user_id: row.get("user_id"),
        create_time: row.get("create_time"),
        name: row.get("name"),
        app_id: row.get("app_id"),
        njobs: row.get("njobs"),
        state,
        submitted_at: row
            .try_get::<Option<DateTime<Utc>>, _>("submitted_at")
            .ok()
            .flatten(),
    })
}

#[instrument(skip_all)]
pub async fn lookup_batch(pool: &Pool, batch_id: i64) -> Result<Option<Batch>> {
    let sql = format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(batch_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_batches_for_user(pool: &Pool, user_id: i64) -> Result<Vec<Batch>> {
    let sql = format!(
        "SELECT {} FROM batches WHERE user_id = ? ORDER BY id DESC",
        BATCH_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(batch_from_row).collect()
}

#[instrument(skip_all)]
pub async fn set_batch_njobs(pool: &Pool, batch_id: i64, njobs: i64) -> Result<()> {
    sqlx::query("UPDATE batches SET njobs = ? WHERE id = ?")
        .bind(njobs)
        .bind(batch_id)
        .execute(pool)
        .await
        .context("failed to persist batch job count")?;
    Ok(())
}

/// Take the submit claim on a batch with one conditional update.
///
/// The row must belong to `user_id`, be in INIT and not already be claimed.
/// Two racing callers cannot both see `Claimed`.
#[instrument(skip_all)]
pub async fn claim_batch_for_submit(
    pool: &Pool,
    batch_id: i64,
    user_id: i64,
) -> Result<SubmitClaim> {
    let updated = sqlx::query(
        "UPDATE batches SET submitting = 1 WHERE id = ? AND user_id = ? AND state = ? AND submitting = 0",
    )
    .bind(batch_id)
    .bind(user_id)
    .bind(BatchState::Init.as_str())
    .execute(pool)
    .await?
    .rows_affected();

    let Some(batch) = lookup_batch(pool, batch_id).await? else {
        return Ok(SubmitClaim::NotFound);
    };

    if updated == 1 {
        return Ok(SubmitClaim::Claimed(batch));
    }
    if batch.user_id != user_id {
        return Ok(SubmitClaim::NotOwner);
    }
    if batch.state != BatchState::Init {
        return Ok(SubmitClaim::AlreadySubmitted);
    }
    // INIT, owned by the caller, yet not updated: someone else holds the claim.
    Ok(SubmitClaim::InFlight)
}

/// Drop the submit claim of a batch still in INIT. Returns whether a claim was held.
#[instrument(skip_all)]
pub async fn release_submit_claim(pool: &Pool, batch_id: i64) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE batches SET submitting = 0 WHERE id = ? AND state = ? AND submitting = 1",
    )
    .bind(batch_id)
    .bind(BatchState::Init.as_str())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

/// INIT -> IN_PROGRESS for a claimed batch. Returns false if the row was not
/// in the claimed INIT state.
#[instrument(skip_all)]
pub async fn mark_batch_in_progress(pool: &Pool, batch_id: i64) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE batches SET state = ?, submitting = 0, submitted_at = ? WHERE id = ? AND state = ? AND submitting = 1",
    )
    .bind(BatchState::InProgress.as_str())
    .bind(Utc::now())
    .bind(batch_id)
    .bind(BatchState::Init.as_str())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x/y"), "postgres://x/y");
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested").join("submit.db");
        let url = format!("sqlite:{}?mode=rwc", file.display());
        assert_eq!(
            prepare_sqlite_url(&url),
            format!("sqlite://{}?mode=rwc", file.display())
        );
        assert!(td.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let pool = setup_pool().await;
        let a1 = register_app(&pool, "autodock").await.unwrap();
        let a2 = register_app(&pool, "autodock").await.unwrap();
        assert_eq!(a1, a2);
        let app = lookup_app(&pool, "autodock").await.unwrap().unwrap();
        assert_eq!(app.id, a1);
        assert!(lookup_app(&pool, "other").await.unwrap().is_none());

        let p = register_platform(&pool, "x86_64-pc-linux-gnu").await.unwrap();
        let plat = lookup_platform(&pool, "x86_64-pc-linux-gnu")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plat.id, p);
    }

    #[tokio::test]
    async fn claim_then_complete() {
        let pool = setup_pool().await;
        let app_id = register_app(&pool, "autodock").await.unwrap();
        let bid = insert_batch(&pool, 7, app_id, "autodock test", Utc::now())
            .await
            .unwrap();
        set_batch_njobs(&pool, bid, 3).await.unwrap();

        let batch = lookup_batch(&pool, bid).await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::Init);
        assert_eq!(batch.njobs, 3);
        assert!(batch.submitted_at.is_none());

        assert!(matches!(
            claim_batch_for_submit(&pool, bid, 8).await.unwrap(),
            SubmitClaim::NotOwner
        ));
        assert!(matches!(
            claim_batch_for_submit(&pool, bid + 100, 7).await.unwrap(),
            SubmitClaim::NotFound
        ));
        assert!(matches!(
            claim_batch_for_submit(&pool, bid, 7).await.unwrap(),
            SubmitClaim::Claimed(_)
        ));
        // Second claim while the first is held.
        assert!(matches!(
            claim_batch_for_submit(&pool, bid, 7).await.unwrap(),
            SubmitClaim::InFlight
        ));

        assert!(mark_batch_in_progress(&pool, bid).await.unwrap());
        let batch = lookup_batch(&pool, bid).await.unwrap().unwrap();
        assert_eq!(batch.state, BatchState::InProgress);
        assert!(batch.submitted_at.is_some());

        assert!(matches!(
            claim_batch_for_submit(&pool, bid, 7).await.unwrap(),
            SubmitClaim::AlreadySubmitted
        ));
        assert!(!mark_batch_in_progress(&pool, bid).await.unwrap());
    }

    #[tokio::test]
    async fn released_claim_can_be_retaken() {
        let pool = setup_pool().await;
        let app_id = register_app(&pool, "autodock").await.unwrap();
        let bid = insert_batch(&pool, 1, app_id, "b", Utc::now()).await.unwrap();

        assert!(!release_submit_claim(&pool, bid).await.unwrap());
        assert!(matches!(
            claim_batch_for_submit(&pool, bid, 1).await.unwrap(),
            SubmitClaim::Claimed(_)
        ));
        assert!(release_submit_claim(&pool, bid).await.unwrap());
        assert!(matches!(
            claim_batch_for_submit(&pool, bid, 1).await.unwrap(),
            SubmitClaim::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn list_is_scoped_to_user() {
        let pool = setup_pool().await;
        let app_id = register_app(&pool, "autodock").await.unwrap();
        let b1 = insert_batch(&pool, 1, app_id, "one", Utc::now()).await.unwrap();
        let b2 = insert_batch(&pool, 1, app_id, "two", Utc::now()).await.unwrap();
        insert_batch(&pool, 2, app_id, "other", Utc::now()).await.unwrap();

        let ids: Vec<i64> = list_batches_for_user(&pool, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![b2, b1]);
    }
}
