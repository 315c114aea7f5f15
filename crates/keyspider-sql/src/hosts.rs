use chrono::{DateTime, Utc};
use serde::Serialize;

/// A fleet host, discovered either as a scan target or as the source of an
/// observed access event. `hostname` is the natural key.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Host {
    pub id: i64,
    pub hostname: String,
    pub fqdn: Option<String>,
    pub os_type: String,
    pub reachable_from_jump: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Upsert a host by hostname. A null `fqdn` never clobbers a previously
/// recorded one; reachability and os_type always reflect the latest probe.
pub async fn upsert(
    hostname: &str,
    fqdn: Option<&str>,
    os_type: &str,
    reachable: bool,
    pool: &sqlx::PgPool,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"insert into hosts (hostname, fqdn, os_type, reachable_from_jump, last_seen)
        values ($1, $2, $3, $4, now())
        on conflict (hostname) do update set
            fqdn = coalesce(excluded.fqdn, hosts.fqdn),
            os_type = excluded.os_type,
            reachable_from_jump = excluded.reachable_from_jump,
            last_seen = now()
        returning id;
        "#,
    )
    .bind(hostname)
    .bind(fqdn)
    .bind(os_type)
    .bind(reachable)
    .fetch_one(pool)
    .await
}

pub async fn list(limit: i64, pool: &sqlx::PgPool) -> sqlx::Result<Vec<Host>> {
    sqlx::query_as(
        r#"select id, hostname, fqdn, os_type, reachable_from_jump, created_at, last_seen
        from hosts
        order by hostname
        limit $1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
