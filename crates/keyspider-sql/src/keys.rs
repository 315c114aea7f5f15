use chrono::{DateTime, Utc};
use serde::Serialize;

/// A distinct key identity. Uniqueness is by the SHA-256 fingerprint of the
/// public key; `public_key` and `comment` may be filled in over time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SshKey {
    pub id: i64,
    pub key_type: String,
    pub public_key: Option<String>,
    pub fingerprint_sha256: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a key instance was found: an authorized_keys entry, or a private
/// key file located on disk (whose content is never read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInstanceType {
    AuthorizedKey,
    Private,
}

impl KeyInstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyInstanceType::AuthorizedKey => "authorized_key",
            KeyInstanceType::Private => "private",
        }
    }
}

#[derive(Debug)]
pub struct NewKeyInstance<'a> {
    pub host_id: i64,
    pub username: Option<&'a str>,
    pub path: &'a str,
    pub key_id: Option<i64>,
    pub instance_type: KeyInstanceType,
    pub owner: Option<&'a str>,
    pub group: Option<&'a str>,
    pub perm: Option<&'a str>,
    pub size_bytes: Option<i64>,
    pub mtime: Option<DateTime<Utc>>,
}

pub async fn upsert_ssh_key(
    key_type: &str,
    public_key: Option<&str>,
    fingerprint_sha256: &str,
    comment: Option<&str>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"insert into ssh_keys (key_type, public_key, fingerprint_sha256, comment)
        values ($1, $2, $3, $4)
        on conflict (fingerprint_sha256) do update set
            key_type = excluded.key_type,
            public_key = coalesce(excluded.public_key, ssh_keys.public_key),
            comment = coalesce(excluded.comment, ssh_keys.comment)
        returning id;
        "#,
    )
    .bind(key_type)
    .bind(public_key)
    .bind(fingerprint_sha256)
    .bind(comment)
    .fetch_one(pool)
    .await
}

pub async fn list(limit: i64, pool: &sqlx::PgPool) -> sqlx::Result<Vec<SshKey>> {
    sqlx::query_as(
        r#"select id, key_type, public_key, fingerprint_sha256, comment, created_at
        from ssh_keys
        order by created_at desc
        limit $1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Upsert a key file occurrence by `(host_id, path, instance_type)`. Fields
/// absent from this observation never clobber fields recorded by an earlier
/// one.
pub async fn upsert_key_instance(
    ki: &NewKeyInstance<'_>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"insert into key_instances
            (host_id, username, path, key_id, instance_type, owner, "group", perm,
             size_bytes, mtime, first_seen, last_seen)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now())
        on conflict (host_id, path, instance_type) do update set
            key_id = coalesce(excluded.key_id, key_instances.key_id),
            owner = coalesce(excluded.owner, key_instances.owner),
            "group" = coalesce(excluded."group", key_instances."group"),
            perm = coalesce(excluded.perm, key_instances.perm),
            size_bytes = coalesce(excluded.size_bytes, key_instances.size_bytes),
            mtime = coalesce(excluded.mtime, key_instances.mtime),
            last_seen = now()
        returning id;
        "#,
    )
    .bind(ki.host_id)
    .bind(ki.username)
    .bind(ki.path)
    .bind(ki.key_id)
    .bind(ki.instance_type.as_str())
    .bind(ki.owner)
    .bind(ki.group)
    .bind(ki.perm)
    .bind(ki.size_bytes)
    .bind(ki.mtime)
    .fetch_one(pool)
    .await
}
