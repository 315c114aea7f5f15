//! Per-line ingestion shared by the scan pipeline and the live watcher:
//! access-event inserts, DNS enrichment, source reachability probes, and
//! edge/concern emission.

use super::Spider;
use crate::parsers::{LinuxSshdParser, ParsedEvent};
use keyspider_sql::{access_events, concerns, edges, hosts};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Nominal confidence for edges derived from log evidence. Upserts take the
/// maximum, so stronger future evidence types can only raise it.
const LOG_EVIDENCE_CONFIDENCE: i32 = 80;

#[derive(Debug, Default)]
pub(crate) struct IngestCounts {
    pub inserted: usize,
    pub edges_upserted: usize,
    pub concerns_raised: usize,
    pub sources: BTreeSet<String>,
}

#[derive(Debug)]
pub(crate) struct EventOutcome {
    pub event_id: i64,
    pub src_label: Option<String>,
    pub edge_upserted: bool,
    pub concern_raised: bool,
}

/// Pick the label an edge source is known by: the first PTR name when DNS
/// gave one (trailing dot stripped), otherwise the bare source IP.
pub(crate) fn derive_src_label(
    source_ip: &str,
    ptr: Option<&str>,
) -> (Option<String>, String) {
    let source_host = ptr
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty());
    let src_label = source_host
        .clone()
        .unwrap_or_else(|| source_ip.to_string());
    (source_host, src_label)
}

impl Spider {
    pub(crate) async fn ingest_logs(
        &self,
        dest_id: i64,
        log_text: &str,
        parser: &LinuxSshdParser,
    ) -> IngestCounts {
        let mut counts = IngestCounts::default();
        for line in log_text.lines() {
            let Some(ev) = parser.parse_line(line) else {
                continue;
            };
            let Some(outcome) = self.ingest_event(dest_id, &ev, line).await else {
                continue;
            };
            counts.inserted += 1;
            if outcome.edge_upserted {
                counts.edges_upserted += 1;
            }
            if outcome.concern_raised {
                counts.concerns_raised += 1;
            }
            if let Some(label) = outcome.src_label {
                counts.sources.insert(label);
            }
        }
        counts
    }

    /// Record one parsed event against a destination host. Inserts are
    /// best-effort: a storage failure skips the line rather than poisoning
    /// the batch.
    pub(crate) async fn ingest_event(
        &self,
        dest_id: i64,
        ev: &ParsedEvent,
        raw_line: &str,
    ) -> Option<EventOutcome> {
        let ptr = match (&self.dns, ev.source_ip.parse::<IpAddr>()) {
            (Some(dns), Ok(ip)) => dns.lookup_ptr(ip).await.into_iter().next(),
            _ => None,
        };
        let (source_host, src_label) = derive_src_label(&ev.source_ip, ptr.as_deref());

        let event = access_events::NewAccessEvent {
            ts: ev.ts,
            dest_host_id: dest_id,
            dest_user: nonempty(&ev.dest_user),
            source_host: source_host.as_deref(),
            source_ip: nonempty(&ev.source_ip),
            source_port: (ev.source_port != 0).then_some(ev.source_port),
            fingerprint_sha256: ev.fingerprint_sha256.as_deref(),
            auth_method: Some(ev.auth_method),
            result: Some(ev.result),
            raw_line,
        };
        let event_id = match access_events::insert(&event, &self.pool).await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "insert access_event failed; skipping line");
                return None;
            }
        };

        let mut src_host_id = None;
        let mut edge_upserted = false;
        let mut concern_raised = false;
        if !src_label.is_empty() {
            // Dotted labels are resolvable names or IPv4 addresses; probe
            // them and record them as hosts. Bare tokens (IPv6) are not.
            if src_label.contains('.') {
                let reachable = self.ssh.can_connect(&src_label).await;
                match hosts::upsert(&src_label, Some(&src_label), "linux", reachable, &self.pool)
                    .await
                {
                    Ok(host_id) => {
                        src_host_id = Some(host_id);
                        if !reachable {
                            concern_raised = true;
                            if let Err(err) = concerns::insert(
                                "high",
                                "UNREACHABLE_SOURCE",
                                Some(host_id),
                                None,
                                Some(event_id),
                                "source seen in logs but not reachable from jump",
                                &self.pool,
                            )
                            .await
                            {
                                tracing::warn!(
                                    src_label,
                                    error = %err,
                                    "failed to record source concern"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(src_label, error = %err, "upsert source host failed");
                    }
                }
            }

            match edges::upsert(
                src_host_id,
                &src_label,
                dest_id,
                "log",
                LOG_EVIDENCE_CONFIDENCE,
                &self.pool,
            )
            .await
            {
                Ok(_) => edge_upserted = true,
                Err(err) => {
                    tracing::warn!(src_label, error = %err, "upsert edge failed");
                }
            }
        }

        Some(EventOutcome {
            event_id,
            src_label: (!src_label.is_empty()).then_some(src_label),
            edge_upserted,
            concern_raised,
        })
    }
}

fn nonempty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod test {
    use super::derive_src_label;
    use pretty_assertions::assert_eq;

    #[test]
    fn ptr_name_wins_and_loses_its_trailing_dot() {
        let (source_host, label) =
            derive_src_label("10.0.0.5", Some("bastion.example.com."));
        assert_eq!(source_host.as_deref(), Some("bastion.example.com"));
        assert_eq!(label, "bastion.example.com");
    }

    #[test]
    fn missing_ptr_falls_back_to_the_source_ip() {
        let (source_host, label) = derive_src_label("10.0.0.5", None);
        assert_eq!(source_host, None);
        assert_eq!(label, "10.0.0.5");
    }

    #[test]
    fn empty_ptr_result_is_treated_as_missing() {
        let (source_host, label) = derive_src_label("10.0.0.5", Some("."));
        assert_eq!(source_host, None);
        assert_eq!(label, "10.0.0.5");
    }
}
