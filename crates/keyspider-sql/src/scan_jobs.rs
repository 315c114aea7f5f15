use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScanJob {
    pub id: i64,
    pub kind: String,
    pub target_host: String,
    pub since_interval_seconds: i32,
    pub spider_depth: i32,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub async fn enqueue(
    target_host: &str,
    since: std::time::Duration,
    spider_depth: i32,
    pool: &sqlx::PgPool,
) -> sqlx::Result<i64> {
    let mut since_secs = i32::try_from(since.as_secs()).unwrap_or(i32::MAX);
    if since_secs <= 0 {
        since_secs = 3600;
    }
    sqlx::query_scalar(
        r#"insert into scan_jobs (kind, target_host, since_interval_seconds, spider_depth, status)
        values ('scan', $1, $2, $3, 'queued')
        returning id;
        "#,
    )
    .bind(target_host)
    .bind(since_secs)
    .bind(spider_depth)
    .fetch_one(pool)
    .await
}

/// Atomically claim the oldest queued job, if any. The row-level lock plus
/// `skip locked` makes concurrent workers across processes safe: a queued
/// row is handed to exactly one claimant.
pub async fn claim_next(pool: &sqlx::PgPool) -> sqlx::Result<Option<ScanJob>> {
    sqlx::query_as(
        r#"with next as (
            select id from scan_jobs
            where status = 'queued'
            order by created_at asc
            limit 1
            for update skip locked
        )
        update scan_jobs j
        set status = 'running', started_at = now()
        from next
        where j.id = next.id
        returning j.id, j.kind, j.target_host, j.since_interval_seconds, j.spider_depth,
            j.status, j.error, j.created_at, j.started_at, j.finished_at;
        "#,
    )
    .fetch_optional(pool)
    .await
}

pub async fn finish(id: i64, error: Option<&str>, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    match error {
        None => {
            sqlx::query(
                r#"update scan_jobs set status = 'done', finished_at = now() where id = $1;"#,
            )
            .bind(id)
            .execute(pool)
            .await?;
        }
        Some(message) => {
            sqlx::query(
                r#"update scan_jobs set status = 'error', error = $2, finished_at = now()
                where id = $1;
                "#,
            )
            .bind(id)
            .bind(message)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn fetch(id: i64, pool: &sqlx::PgPool) -> sqlx::Result<Option<ScanJob>> {
    sqlx::query_as(
        r#"select id, kind, target_host, since_interval_seconds, spider_depth, status,
            error, created_at, started_at, finished_at
        from scan_jobs
        where id = $1;
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
