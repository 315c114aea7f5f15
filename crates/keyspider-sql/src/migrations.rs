use anyhow::Context;
use sha2::{Digest, Sha256};
use sqlx::Executor;

/// Embedded schema migrations, ordered by filename. The table of applied
/// migrations records a content hash per file; a recorded migration whose
/// hash no longer matches the embedded file is a hard failure, because
/// silent schema drift must never be tolerated.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_init.sql", include_str!("../migrations/001_init.sql")),
    ("002_scan_jobs.sql", include_str!("../migrations/002_scan_jobs.sql")),
    ("003_keys.sql", include_str!("../migrations/003_keys.sql")),
    ("004_watchers.sql", include_str!("../migrations/004_watchers.sql")),
];

const ENSURE_MIGRATIONS_TABLE: &str = r#"
create table if not exists schema_migrations (
  name text primary key,
  sha256 text not null,
  applied_at timestamptz not null default now()
);
"#;

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn apply(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query(ENSURE_MIGRATIONS_TABLE)
        .execute(pool)
        .await
        .context("ensure schema_migrations")?;

    for (name, content) in MIGRATIONS {
        let hash = sha256_hex(content);
        let recorded: Option<String> =
            sqlx::query_scalar(r#"select sha256 from schema_migrations where name = $1;"#)
                .bind(*name)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("look up migration {name}"))?;

        match recorded {
            Some(existing) if existing == hash => continue,
            Some(existing) => anyhow::bail!(
                "migration {name} hash mismatch (db={existing} fs={hash}): \
                 embedded migrations must never change once applied"
            ),
            None => {
                let mut txn = pool.begin().await.context("begin migration txn")?;
                (&mut *txn)
                    .execute(*content)
                    .await
                    .with_context(|| format!("apply {name}"))?;
                sqlx::query(r#"insert into schema_migrations (name, sha256) values ($1, $2);"#)
                    .bind(*name)
                    .bind(&hash)
                    .execute(&mut *txn)
                    .await
                    .with_context(|| format!("record {name}"))?;
                txn.commit().await.with_context(|| format!("commit {name}"))?;
                tracing::info!(migration = name, "applied schema migration");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{sha256_hex, MIGRATIONS};

    #[test]
    fn migrations_are_sorted_and_unique() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn migrations_are_nonempty_sql() {
        for (name, content) in MIGRATIONS {
            assert!(
                content.contains("create table"),
                "{name} does not create anything"
            );
        }
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(sha256_hex("hello"), sha256_hex("hello "));
    }
}
