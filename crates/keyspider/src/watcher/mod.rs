//! Live per-host watchers: streaming journal tails with resumable cursors,
//! file-tail fallback, in-memory deduplication, and hub fan-out.

mod dedupe;

use crate::config::Config;
use crate::hub::Hub;
use crate::parsers::{LinuxSshdParser, ParsedEvent};
use crate::spider::Spider;
use crate::sshclient::Client;
use anyhow::Context;
use chrono::{DateTime, Utc};
use dedupe::DedupeRing;
use keyspider_sql::{concerns, hosts, watchers};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long an unreachable host backs off before the next probe.
const UNREACHABLE_BACKOFF: Duration = Duration::from_secs(10);
/// Pause between stream attempts against a reachable host.
const RETRY_PAUSE: Duration = Duration::from_secs(2);

const TAIL_FOLLOW_CMD: &str =
    "sh -lc 'if test -r /var/log/secure; then tail -n 0 -F /var/log/secure; else tail -n 0 -F /var/log/auth.log; fi'";

fn journal_follow_cmd(cursor: Option<&str>) -> String {
    let resume = match cursor {
        Some(cursor) => format!("--after-cursor '{cursor}'"),
        None => "--since '2 minutes ago'".to_string(),
    };
    format!(
        "journalctl -f -u ssh -u sshd --no-pager --output=short-iso --show-cursor {resume}"
    )
}

/// Whether a journal session produced output, or the remote side turned out
/// not to support journald at all (fall back to a file tail).
enum JournalEnd {
    Delivered,
    Unavailable,
}

/// The compact payload published to SSE subscribers for each live event.
#[derive(Debug, Serialize)]
struct WatchEventPayload<'a> {
    access_event_id: i64,
    dest_host: &'a str,
    ts: DateTime<Utc>,
    dest_user: &'a str,
    source_ip: &'a str,
    source_port: i32,
    fingerprint: Option<&'a str>,
    raw: &'a str,
}

pub struct Watcher {
    cfg: Arc<Config>,
    pool: sqlx::PgPool,
    ssh: Client,
    spider: Spider,
    hub: Arc<Hub>,
    rings: Mutex<HashMap<i64, DedupeRing>>,
}

impl Watcher {
    pub fn new(cfg: Arc<Config>, pool: sqlx::PgPool, hub: Arc<Hub>) -> Self {
        let ssh = Client::new(&cfg.ssh);
        let spider = Spider::new(cfg.clone(), pool.clone());
        Self {
            cfg,
            pool,
            ssh,
            spider,
            hub,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Run one watch task per configured host until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.cfg.watcher.enabled {
            return;
        }
        if self.cfg.watcher.hosts.is_empty() {
            tracing::warn!("watcher enabled but watcher.hosts is empty");
            return;
        }

        let mut tasks = tokio::task::JoinSet::new();
        for host in self.cfg.watcher.hosts.clone() {
            let watcher = Arc::clone(&self);
            let token = shutdown.clone();
            tasks.spawn(async move { watcher.watch_host(&host, token).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn watch_host(&self, host: &str, shutdown: CancellationToken) {
        tracing::info!(host, "watcher starting");
        while !shutdown.is_cancelled() {
            if let Err(err) = self.watch_pass(host, &shutdown).await {
                tracing::warn!(host, error = %format!("{err:#}"), "watch pass failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RETRY_PAUSE) => {}
            }
        }
        tracing::info!(host, "watcher stopped");
    }

    /// One reachability-probe-to-stream-end cycle.
    async fn watch_pass(&self, host: &str, shutdown: &CancellationToken) -> anyhow::Result<()> {
        if !self.ssh.can_connect(host).await {
            let host_id = hosts::upsert(host, None, "linux", false, &self.pool)
                .await
                .context("upsert unreachable host")?;
            concerns::insert(
                "high",
                "UNREACHABLE_HOST",
                Some(host_id),
                None,
                None,
                "watcher cannot ssh to host",
                &self.pool,
            )
            .await
            .context("record concern")?;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(UNREACHABLE_BACKOFF) => {}
            }
            return Ok(());
        }

        let host_id = hosts::upsert(host, None, "linux", true, &self.pool)
            .await
            .context("upsert host")?;
        watchers::ensure(host_id, "auto", &self.pool)
            .await
            .context("ensure watcher row")?;
        let state = watchers::fetch_state(host_id, &self.pool)
            .await
            .context("fetch watcher state")?;

        match state.mode.as_str() {
            "tail" => self.tail_stream(host, host_id, shutdown).await,
            "journal" => self
                .journal_stream(host, host_id, state.cursor.as_deref(), shutdown)
                .await
                .map(|_| ()),
            _ => {
                match self
                    .journal_stream(host, host_id, state.cursor.as_deref(), shutdown)
                    .await
                {
                    Ok(JournalEnd::Delivered) => Ok(()),
                    Ok(JournalEnd::Unavailable) => {
                        tracing::debug!(host, "journal unavailable; falling back to file tail");
                        self.tail_stream(host, host_id, shutdown).await
                    }
                    Err(err) => {
                        tracing::debug!(
                            host,
                            error = %format!("{err:#}"),
                            "journal stream failed; falling back to file tail"
                        );
                        self.tail_stream(host, host_id, shutdown).await
                    }
                }
            }
        }
    }

    async fn journal_stream(
        &self,
        host: &str,
        host_id: i64,
        cursor: Option<&str>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<JournalEnd> {
        let parser = LinuxSshdParser::new(Utc::now);
        let mut stream = self
            .ssh
            .stream_lines(host, &journal_follow_cmd(cursor))
            .await
            .context("start journal stream")?;

        let mut delivered = false;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = stream.next_line() => Some(next),
            };
            let Some(next) = next else {
                let _ = stream.stop().await;
                return Ok(JournalEnd::Delivered);
            };
            let Some(line) = next.context("journal stream read")? else {
                break;
            };
            delivered = true;

            // Cursor lines are stream bookkeeping, not events.
            if let Some(cursor) = line.strip_prefix("-- cursor:") {
                let cursor = cursor.trim();
                if !cursor.is_empty() {
                    if let Err(err) = watchers::update_cursor(host_id, cursor, &self.pool).await {
                        tracing::warn!(host, error = %err, "persist cursor failed");
                    }
                }
                continue;
            }

            if let Some(ev) = parser.parse_line_enhanced(&line) {
                self.handle_event(host, host_id, &ev, &line).await;
            }
        }

        let status = stream.finish().await.context("journal stream wait")?;
        if !delivered && !status.success() {
            return Ok(JournalEnd::Unavailable);
        }
        Ok(JournalEnd::Delivered)
    }

    async fn tail_stream(
        &self,
        host: &str,
        host_id: i64,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let parser = LinuxSshdParser::new(Utc::now);
        let mut stream = self
            .ssh
            .stream_lines(host, TAIL_FOLLOW_CMD)
            .await
            .context("start tail stream")?;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = stream.next_line() => Some(next),
            };
            let Some(next) = next else {
                let _ = stream.stop().await;
                return Ok(());
            };
            let Some(line) = next.context("tail stream read")? else {
                break;
            };
            if let Some(ev) = parser.parse_line_enhanced(&line) {
                self.handle_event(host, host_id, &ev, &line).await;
            }
        }

        stream.finish().await.context("tail stream wait")?;
        Ok(())
    }

    /// Dedup, persist, emit edges, and publish one live event.
    async fn handle_event(&self, host: &str, host_id: i64, ev: &ParsedEvent, raw: &str) {
        let hash = sha256_hex(raw);
        {
            let mut rings = self.rings.lock().expect("dedupe ring lock");
            let ring = rings
                .entry(host_id)
                .or_insert_with(|| DedupeRing::new(self.cfg.watcher.dedupe_window));
            if ring.check_and_record(&hash) {
                tracing::trace!(host, "duplicate line dropped");
                return;
            }
        }

        let Some(outcome) = self.spider.ingest_event(host_id, ev, raw).await else {
            return;
        };
        if let Err(err) = watchers::update_last_event(host_id, &hash, &self.pool).await {
            tracing::debug!(host, error = %err, "update last_event_sha256 failed");
        }

        let payload = WatchEventPayload {
            access_event_id: outcome.event_id,
            dest_host: host,
            ts: ev.ts,
            dest_user: &ev.dest_user,
            source_ip: &ev.source_ip,
            source_port: ev.source_port,
            fingerprint: ev.fingerprint_sha256.as_deref(),
            raw,
        };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => self.hub.publish(bytes.into()),
            Err(err) => tracing::warn!(host, error = %err, "serialize watch event failed"),
        }
    }
}

fn sha256_hex(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    hex::encode(hasher.finalize())
}
