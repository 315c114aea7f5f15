//! The scan pipeline: a breadth-first expansion from a target host that
//! ingests sshd logs, enriches sources, persists the access graph, and
//! optionally hunts for private key files on discovered sources.

mod authorized_keys;
mod ingest;
mod keyhunt;

use crate::config::Config;
use crate::dns::{ReverseDns, SystemDns};
use crate::parsers::LinuxSshdParser;
use crate::sshclient::Client;
use anyhow::Context;
use chrono::Utc;
use keyspider_sql::{concerns, hosts};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub events_inserted: usize,
    pub keys_seen: usize,
    pub hosts_visited: usize,
    pub edges_upserted: usize,
    pub concerns_raised: usize,
}

pub struct Spider {
    cfg: Arc<Config>,
    pool: sqlx::PgPool,
    ssh: Client,
    dns: Option<Arc<dyn ReverseDns>>,
}

impl Spider {
    pub fn new(cfg: Arc<Config>, pool: sqlx::PgPool) -> Self {
        let dns = if cfg.discovery.dns.enabled {
            match SystemDns::from_system_conf() {
                Ok(resolver) => Some(Arc::new(resolver) as Arc<dyn ReverseDns>),
                Err(err) => {
                    tracing::warn!(error = %err, "resolver init failed; reverse dns disabled");
                    None
                }
            }
        } else {
            None
        };
        let ssh = Client::new(&cfg.ssh);
        Self { cfg, pool, ssh, dns }
    }

    /// Test seam: swap in a canned resolver.
    pub fn with_resolver(mut self, dns: Arc<dyn ReverseDns>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Breadth-first scan starting at `dest_host`. Sources observed in a
    /// host's logs become new scan targets while `depth < spider_depth`.
    /// The visited set keys on literal labels: an IP and its PTR name are
    /// distinct nodes until evidence reaches both.
    #[tracing::instrument(skip(self), fields(host = %dest_host, depth = spider_depth))]
    pub async fn scan_host(
        &self,
        dest_host: &str,
        since: Duration,
        spider_depth: u32,
    ) -> anyhow::Result<ScanOutcome> {
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((dest_host.to_string(), 0));
        let mut visited: HashSet<String> = HashSet::new();
        let mut outcome = ScanOutcome::default();

        while let Some((host, depth)) = queue.pop_front() {
            if !visited.insert(host.clone()) {
                continue;
            }
            outcome.hosts_visited += 1;

            let reachable = self.ssh.can_connect(&host).await;
            let os_type = if reachable {
                self.detect_os_type(&host).await
            } else {
                "linux".to_string()
            };
            let dest_id = hosts::upsert(&host, None, &os_type, reachable, &self.pool)
                .await
                .context("upsert host")?;

            if !reachable {
                outcome.concerns_raised += 1;
                if let Err(err) = concerns::insert(
                    "high",
                    "UNREACHABLE_HOST",
                    Some(dest_id),
                    None,
                    None,
                    "jump server cannot ssh to host",
                    &self.pool,
                )
                .await
                {
                    tracing::warn!(host, error = %err, "failed to record concern");
                }
                continue;
            }

            let log_text = self
                .fetch_sshd_logs(&host, since)
                .await
                .with_context(|| format!("fetch sshd logs from {host}"))?;

            let parser = LinuxSshdParser::new(Utc::now);
            let ingested = self.ingest_logs(dest_id, &log_text, &parser).await;
            outcome.events_inserted += ingested.inserted;
            outcome.edges_upserted += ingested.edges_upserted;
            outcome.concerns_raised += ingested.concerns_raised;

            outcome.keys_seen += self
                .scan_authorized_keys(dest_id, &host)
                .await
                .with_context(|| format!("scan authorized_keys on {host}"))?;

            if self.cfg.key_hunt.enabled {
                for source in &ingested.sources {
                    if let Err(err) = self.best_effort_key_hunt(source).await {
                        tracing::debug!(source, error = %format!("{err:#}"), "key hunt failed");
                    }
                }
            }

            if depth < spider_depth {
                for source in ingested.sources {
                    if !source.is_empty() {
                        queue.push_back((source, depth + 1));
                    }
                }
            }
        }

        Ok(outcome)
    }

    pub(crate) async fn detect_os_type(&self, host: &str) -> String {
        match self.ssh.run(host, "uname -s").await {
            Ok(out) => {
                let os = out.trim();
                if os.is_empty() {
                    "linux".to_string()
                } else {
                    os.to_lowercase()
                }
            }
            Err(_) => "linux".to_string(),
        }
    }

    async fn fetch_sshd_logs(&self, host: &str, since: Duration) -> anyhow::Result<String> {
        Ok(self.ssh.run(host, &fetch_logs_cmd(since)).await?)
    }
}

/// Bulk log fetch with fall-through: journald units where available,
/// otherwise the conventional flat files.
fn fetch_logs_cmd(since: Duration) -> String {
    format!(
        "sh -lc \"(command -v journalctl >/dev/null 2>&1 && journalctl -u ssh -u sshd --since '{}m' --no-pager) || (test -r /var/log/secure && tail -n 20000 /var/log/secure) || (test -r /var/log/auth.log && tail -n 20000 /var/log/auth.log)\"",
        since.as_secs() / 60
    )
}

#[cfg(test)]
mod test {
    use super::fetch_logs_cmd;
    use std::time::Duration;

    #[test]
    fn log_fetch_command_shape_is_stable() {
        // The remote side depends on this literal; see the transport notes.
        assert_eq!(
            fetch_logs_cmd(Duration::from_secs(3600)),
            "sh -lc \"(command -v journalctl >/dev/null 2>&1 && journalctl -u ssh -u sshd --since '60m' --no-pager) || (test -r /var/log/secure && tail -n 20000 /var/log/secure) || (test -r /var/log/auth.log && tail -n 20000 /var/log/auth.log)\""
        );
    }

    #[test]
    fn lookback_truncates_to_whole_minutes() {
        assert!(fetch_logs_cmd(Duration::from_secs(90)).contains("--since '1m'"));
        assert!(fetch_logs_cmd(Duration::from_secs(59)).contains("--since '0m'"));
    }
}
