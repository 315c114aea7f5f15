use chrono::{DateTime, Utc};
use serde::Serialize;

/// One successful login observation parsed from a destination host's sshd
/// logs. Append-only; rows are never updated.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccessEvent {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub dest_host_id: i64,
    pub dest_user: Option<String>,
    pub source_host: Option<String>,
    pub source_ip: Option<String>,
    pub source_port: Option<i32>,
    pub fingerprint_sha256: Option<String>,
    pub auth_method: Option<String>,
    pub result: Option<String>,
    pub raw_line: String,
}

#[derive(Debug)]
pub struct NewAccessEvent<'a> {
    pub ts: DateTime<Utc>,
    pub dest_host_id: i64,
    pub dest_user: Option<&'a str>,
    pub source_host: Option<&'a str>,
    pub source_ip: Option<&'a str>,
    pub source_port: Option<i32>,
    pub fingerprint_sha256: Option<&'a str>,
    pub auth_method: Option<&'a str>,
    pub result: Option<&'a str>,
    pub raw_line: &'a str,
}

pub async fn insert(ev: &NewAccessEvent<'_>, pool: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"insert into access_events
            (ts, dest_host_id, dest_user, source_host, source_ip, source_port,
             fingerprint_sha256, auth_method, result, raw_line)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        returning id;
        "#,
    )
    .bind(ev.ts)
    .bind(ev.dest_host_id)
    .bind(ev.dest_user)
    .bind(ev.source_host)
    .bind(ev.source_ip)
    .bind(ev.source_port)
    .bind(ev.fingerprint_sha256)
    .bind(ev.auth_method)
    .bind(ev.result)
    .bind(ev.raw_line)
    .fetch_one(pool)
    .await
}

pub async fn list_for_host(
    host_id: i64,
    limit: i64,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Vec<AccessEvent>> {
    sqlx::query_as(
        r#"select id, ts, dest_host_id, dest_user, source_host, source_ip, source_port,
            fingerprint_sha256, auth_method, result, raw_line
        from access_events
        where dest_host_id = $1
        order by ts desc
        limit $2;
        "#,
    )
    .bind(host_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
