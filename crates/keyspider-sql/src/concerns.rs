use chrono::{DateTime, Utc};
use serde::Serialize;

/// A flagged condition observed during scanning or watching, such as an
/// unreachable host. Append-only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Concern {
    pub id: i64,
    pub severity: String,
    #[serde(rename = "type")]
    pub concern_type: String,
    pub host_id: Option<i64>,
    pub key_id: Option<i64>,
    pub access_event_id: Option<i64>,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

pub async fn list(limit: i64, pool: &sqlx::PgPool) -> sqlx::Result<Vec<Concern>> {
    sqlx::query_as(
        r#"select id, severity, type as concern_type, host_id, key_id, access_event_id,
            details, created_at
        from concerns
        order by created_at desc
        limit $1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    severity: &str,
    concern_type: &str,
    host_id: Option<i64>,
    key_id: Option<i64>,
    access_event_id: Option<i64>,
    details: &str,
    pool: &sqlx::PgPool,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"insert into concerns (severity, type, host_id, key_id, access_event_id, details)
        values ($1, $2, $3, $4, $5, $6)
        returning id;
        "#,
    )
    .bind(severity)
    .bind(concern_type)
    .bind(host_id)
    .bind(key_id)
    .bind(access_event_id)
    .bind(details)
    .fetch_one(pool)
    .await
}
