//! Bounded search for private key files on reachable source hosts.
//!
//! Key contents are never transferred: the remote side only reports paths,
//! confirms the OpenSSH private-key header, and derives the public form via
//! `ssh-keygen -y` so a fingerprint can be computed from public material.

use super::Spider;
use crate::keys;
use keyspider_sql::{hosts, keys as sql_keys};

fn keyhunt_find_cmd(roots: &[String], max_depth: u32, max_files: usize) -> String {
    let quoted = roots
        .iter()
        .map(|root| format!("\"{root}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "sh -lc 'find {quoted} -xdev -maxdepth {max_depth} -type f \\( -name \"id_rsa\" -o -name \"id_ed25519\" -o -name \"id_ecdsa\" -o -name \"identity\" -o -name \"*.pem\" -o -name \"id_*\" \\) -size -2M 2>/dev/null | head -n {max_files}'"
    )
}

fn derive_pubkey_cmd(path: &str) -> String {
    format!(
        "sh -lc 'if head -n 1 \"{path}\" | grep -q \"BEGIN OPENSSH PRIVATE KEY\"; then echo PRIV; ssh-keygen -y -f \"{path}\" 2>/dev/null; fi'"
    )
}

impl Spider {
    /// Hunt for private key files on a source host. Unreachable sources are
    /// skipped silently; their concerns were already raised during ingest.
    pub(crate) async fn best_effort_key_hunt(&self, source_host: &str) -> anyhow::Result<()> {
        if source_host.is_empty() {
            return Ok(());
        }
        if !self.ssh.can_connect(source_host).await {
            return Ok(());
        }

        let host_id =
            hosts::upsert(source_host, Some(source_host), "linux", true, &self.pool).await?;

        let hunt = &self.cfg.key_hunt;
        if hunt.allow_roots.is_empty() {
            return Ok(());
        }

        let listing = self
            .ssh
            .run(
                source_host,
                &keyhunt_find_cmd(&hunt.allow_roots, hunt.max_depth, hunt.max_files),
            )
            .await?;

        for path in listing.lines().map(str::trim).filter(|p| !p.is_empty()) {
            match self.ssh.run(source_host, &derive_pubkey_cmd(path)).await {
                Err(err) => {
                    // The path still names a potential key file.
                    tracing::debug!(path, error = %err, "public key derivation failed");
                    self.record_private_instance(host_id, path, None).await;
                }
                Ok(derived) => {
                    let mut lines = derived.trim().lines().map(str::trim);
                    if lines.next() != Some("PRIV") {
                        continue;
                    }
                    let key_id = match lines.next().and_then(keys::parse_authorized_keys_line) {
                        Some(key) => sql_keys::upsert_ssh_key(
                            &key.key_type,
                            Some(&key.authorized),
                            &key.fingerprint_sha256,
                            None,
                            &self.pool,
                        )
                        .await
                        .ok(),
                        None => None,
                    };
                    self.record_private_instance(host_id, path, key_id).await;
                }
            }
        }
        Ok(())
    }

    async fn record_private_instance(&self, host_id: i64, path: &str, key_id: Option<i64>) {
        let instance = sql_keys::NewKeyInstance {
            host_id,
            username: None,
            path,
            key_id,
            instance_type: sql_keys::KeyInstanceType::Private,
            owner: None,
            group: None,
            perm: None,
            size_bytes: None,
            mtime: None,
        };
        if let Err(err) = sql_keys::upsert_key_instance(&instance, &self.pool).await {
            tracing::warn!(path, error = %err, "upsert private key_instance failed");
        }
    }
}

#[cfg(test)]
mod test {
    use super::{derive_pubkey_cmd, keyhunt_find_cmd};

    #[test]
    fn find_command_quotes_roots_and_applies_bounds() {
        let cmd = keyhunt_find_cmd(
            &["/home".to_string(), "/root".to_string()],
            10,
            20_000,
        );
        assert!(cmd.starts_with("sh -lc 'find \"/home\" \"/root\" -xdev -maxdepth 10 "));
        assert!(cmd.contains("-name \"id_rsa\""));
        assert!(cmd.contains("-name \"id_ed25519\""));
        assert!(cmd.contains("-name \"id_ecdsa\""));
        assert!(cmd.contains("-name \"identity\""));
        assert!(cmd.contains("-name \"*.pem\""));
        assert!(cmd.contains("-name \"id_*\""));
        assert!(cmd.contains("-size -2M"));
        assert!(cmd.ends_with("| head -n 20000'"));
    }

    #[test]
    fn derive_command_checks_the_header_before_keygen() {
        let cmd = derive_pubkey_cmd("/home/alice/.ssh/id_ed25519");
        assert_eq!(
            cmd,
            "sh -lc 'if head -n 1 \"/home/alice/.ssh/id_ed25519\" | grep -q \"BEGIN OPENSSH PRIVATE KEY\"; then echo PRIV; ssh-keygen -y -f \"/home/alice/.ssh/id_ed25519\" 2>/dev/null; fi'"
        );
    }
}
