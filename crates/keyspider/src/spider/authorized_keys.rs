//! Collection and persistence of authorized_keys material from a host.

use super::Spider;
use crate::keys;
use anyhow::Context;
use keyspider_sql::keys as sql_keys;

/// One bounded remote pass over the conventional authorized_keys locations,
/// concatenated with `---FILE <path>` separators so a single round trip
/// covers every user.
pub(crate) const AUTHORIZED_KEYS_CMD: &str = "sh -lc 'for f in /root/.ssh/authorized_keys /home/*/.ssh/authorized_keys; do [ -r \"$f\" ] || continue; echo \"---FILE $f\"; cat \"$f\"; echo; done'";

impl Spider {
    /// Pull authorized_keys files and persist each entry as a key identity
    /// plus a key instance at its path. Returns the number of keys seen.
    pub(crate) async fn scan_authorized_keys(
        &self,
        host_id: i64,
        host: &str,
    ) -> anyhow::Result<usize> {
        let output = self.ssh.run(host, AUTHORIZED_KEYS_CMD).await?;

        let mut current_path = String::new();
        let mut count = 0;
        for line in output.lines() {
            if let Some(path) = line.strip_prefix("---FILE ") {
                current_path = path.trim().to_string();
                continue;
            }
            let Some(key) = keys::parse_authorized_keys_line(line) else {
                continue;
            };
            count += 1;

            let key_id = sql_keys::upsert_ssh_key(
                &key.key_type,
                Some(&key.authorized),
                &key.fingerprint_sha256,
                key.comment.as_deref(),
                &self.pool,
            )
            .await
            .context("upsert ssh_key")?;

            let instance = sql_keys::NewKeyInstance {
                host_id,
                username: None,
                path: &current_path,
                key_id: Some(key_id),
                instance_type: sql_keys::KeyInstanceType::AuthorizedKey,
                owner: None,
                group: None,
                perm: None,
                size_bytes: None,
                mtime: None,
            };
            sql_keys::upsert_key_instance(&instance, &self.pool)
                .await
                .context("upsert key_instance")?;
        }
        Ok(count)
    }
}
