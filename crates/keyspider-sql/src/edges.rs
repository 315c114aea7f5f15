use chrono::{DateTime, Utc};
use serde::Serialize;

/// A directed access relationship from a source label (reverse-resolved FQDN
/// or bare IP) to a destination host, derived from observed evidence.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Edge {
    pub id: i64,
    pub src_host_id: Option<i64>,
    pub src_label: String,
    pub dest_host_id: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub evidence_type: String,
    pub confidence: i32,
}

/// Upsert an edge by `(src_label, dest_host_id)`. The source host id
/// coalesces, evidence replaces, and confidence only ever increases.
pub async fn upsert(
    src_host_id: Option<i64>,
    src_label: &str,
    dest_host_id: i64,
    evidence_type: &str,
    confidence: i32,
    pool: &sqlx::PgPool,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"insert into edges
            (src_host_id, src_label, dest_host_id, evidence_type, confidence, first_seen, last_seen)
        values ($1, $2, $3, $4, $5, now(), now())
        on conflict (src_label, dest_host_id) do update set
            src_host_id = coalesce(excluded.src_host_id, edges.src_host_id),
            evidence_type = excluded.evidence_type,
            confidence = greatest(edges.confidence, excluded.confidence),
            last_seen = now()
        returning id;
        "#,
    )
    .bind(src_host_id)
    .bind(src_label)
    .bind(dest_host_id)
    .bind(evidence_type)
    .bind(confidence)
    .fetch_one(pool)
    .await
}

pub async fn list(limit: i64, pool: &sqlx::PgPool) -> sqlx::Result<Vec<Edge>> {
    sqlx::query_as(
        r#"select id, src_host_id, src_label, dest_host_id, first_seen, last_seen,
            evidence_type, confidence
        from edges
        order by last_seen desc
        limit $1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
