use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WatcherState {
    pub host_id: i64,
    pub enabled: bool,
    pub mode: String,
    pub cursor: Option<String>,
    pub last_event_sha256: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

pub async fn ensure(host_id: i64, mode: &str, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query(
        r#"insert into watchers (host_id, enabled, mode)
        values ($1, true, $2)
        on conflict (host_id) do update set
            enabled = true,
            mode = excluded.mode,
            updated_at = now();
        "#,
    )
    .bind(host_id)
    .bind(mode)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_state(host_id: i64, pool: &sqlx::PgPool) -> sqlx::Result<WatcherState> {
    sqlx::query_as(
        r#"select host_id, enabled, mode, cursor, last_event_sha256, last_heartbeat
        from watchers
        where host_id = $1;
        "#,
    )
    .bind(host_id)
    .fetch_one(pool)
    .await
}

pub async fn update_cursor(host_id: i64, cursor: &str, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query(
        r#"update watchers set cursor = $2, last_heartbeat = now(), updated_at = now()
        where host_id = $1;
        "#,
    )
    .bind(host_id)
    .bind(cursor)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_last_event(
    host_id: i64,
    sha256: &str,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"update watchers set last_event_sha256 = $2, last_heartbeat = now(), updated_at = now()
        where host_id = $1;
        "#,
    )
    .bind(host_id)
    .bind(sha256)
    .execute(pool)
    .await?;
    Ok(())
}
