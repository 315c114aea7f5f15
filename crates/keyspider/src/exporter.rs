//! Graph export serializers: JSON, CSV, and GraphML renderings of the
//! hosts/edges access graph.

use keyspider_sql::{edges, hosts};
use keyspider_sql::{edges::Edge, hosts::Host};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Csv,
    GraphMl,
}

impl Format {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Format::Json),
            "csv" => Some(Format::Csv),
            "graphml" => Some(Format::GraphMl),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Csv => "text/csv",
            Format::GraphMl => "application/graphml+xml",
        }
    }
}

#[derive(Debug, Serialize)]
struct GraphExport {
    hosts: Vec<Host>,
    edges: Vec<Edge>,
}

/// Fetch up to `limit` hosts/edges and render them in the given format.
pub async fn export_graph(
    format: Format,
    limit: i64,
    pool: &sqlx::PgPool,
) -> anyhow::Result<Vec<u8>> {
    match format {
        Format::Json => {
            let hosts = hosts::list(limit, pool).await?;
            let edges = edges::list(limit, pool).await?;
            render_json(hosts, edges)
        }
        Format::Csv => {
            let edges = edges::list(limit, pool).await?;
            render_csv(&edges)
        }
        Format::GraphMl => {
            let hosts = hosts::list(limit, pool).await?;
            let edges = edges::list(limit, pool).await?;
            Ok(render_graphml(&hosts, &edges).into_bytes())
        }
    }
}

fn render_json(hosts: Vec<Host>, edges: Vec<Edge>) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&GraphExport { hosts, edges })?)
}

fn render_csv(edges: &[Edge]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "src_label",
        "dest_host_id",
        "evidence_type",
        "confidence",
        "first_seen",
        "last_seen",
    ])?;
    for edge in edges {
        writer.write_record([
            edge.src_label.as_str(),
            &edge.dest_host_id.to_string(),
            &edge.evidence_type,
            &edge.confidence.to_string(),
            &edge.first_seen.to_rfc3339(),
            &edge.last_seen.to_rfc3339(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("finish csv: {err}"))
}

/// Minimal GraphML. Hosts become `host:<id>` nodes; source labels with no
/// known host become `src:<label>` nodes.
fn render_graphml(hosts: &[Host], edges: &[Edge]) -> String {
    let mut nodes = std::collections::HashSet::new();
    let mut out = String::new();

    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    out.push_str("<graph id=\"keyspider\" edgedefault=\"directed\">\n");

    for host in hosts {
        let id = format!("host:{}", host.id);
        let _ = writeln!(
            out,
            "<node id=\"{}\"><data key=\"hostname\">{}</data></node>",
            xml_escape(&id),
            xml_escape(&host.hostname)
        );
        nodes.insert(id);
    }

    for edge in edges {
        let src = match edge.src_host_id {
            Some(host_id) => format!("host:{host_id}"),
            None => format!("src:{}", edge.src_label),
        };
        let dst = format!("host:{}", edge.dest_host_id);
        if nodes.insert(src.clone()) {
            let _ = writeln!(
                out,
                "<node id=\"{}\"><data key=\"label\">{}</data></node>",
                xml_escape(&src),
                xml_escape(&edge.src_label)
            );
        }
        // The destination should already exist as a host node, but render
        // a placeholder rather than emit a dangling edge reference.
        if nodes.insert(dst.clone()) {
            let _ = writeln!(
                out,
                "<node id=\"{}\"><data key=\"label\">{}</data></node>",
                xml_escape(&dst),
                xml_escape(&dst)
            );
        }
        let _ = writeln!(
            out,
            "<edge source=\"{}\" target=\"{}\"><data key=\"evidence\">{}</data><data key=\"confidence\">{}</data></edge>",
            xml_escape(&src),
            xml_escape(&dst),
            xml_escape(&edge.evidence_type),
            edge.confidence
        );
    }

    out.push_str("</graph>\n</graphml>\n");
    out
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod test {
    use super::{render_csv, render_graphml, render_json, xml_escape, Format};
    use chrono::{TimeZone, Utc};
    use keyspider_sql::{edges::Edge, hosts::Host};

    fn fixture() -> (Vec<Host>, Vec<Edge>) {
        let seen = Utc.with_ymd_and_hms(2024, 2, 3, 22, 1, 2).unwrap();
        let hosts = vec![Host {
            id: 1,
            hostname: "web1.example.com".to_string(),
            fqdn: Some("web1.example.com".to_string()),
            os_type: "linux".to_string(),
            reachable_from_jump: true,
            created_at: seen,
            last_seen: Some(seen),
        }];
        let edges = vec![
            Edge {
                id: 10,
                src_host_id: Some(1),
                src_label: "web1.example.com".to_string(),
                dest_host_id: 1,
                first_seen: seen,
                last_seen: seen,
                evidence_type: "log".to_string(),
                confidence: 80,
            },
            Edge {
                id: 11,
                src_host_id: None,
                src_label: "198.51.100.7".to_string(),
                dest_host_id: 1,
                first_seen: seen,
                last_seen: seen,
                evidence_type: "log".to_string(),
                confidence: 80,
            },
        ];
        (hosts, edges)
    }

    #[test]
    fn format_names_round_trip() {
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("csv"), Some(Format::Csv));
        assert_eq!(Format::parse("graphml"), Some(Format::GraphMl));
        assert_eq!(Format::parse("yaml"), None);
        assert_eq!(Format::Csv.content_type(), "text/csv");
    }

    #[test]
    fn json_export_nests_hosts_and_edges() {
        let (hosts, edges) = fixture();
        let value: serde_json::Value =
            serde_json::from_slice(&render_json(hosts, edges).unwrap()).unwrap();
        assert_eq!(value["hosts"][0]["hostname"], "web1.example.com");
        assert_eq!(value["edges"][1]["src_label"], "198.51.100.7");
        assert_eq!(value["edges"][0]["confidence"], 80);
    }

    #[test]
    fn csv_export_has_the_documented_header() {
        let (_, edges) = fixture();
        let text = String::from_utf8(render_csv(&edges).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "src_label,dest_host_id,evidence_type,confidence,first_seen,last_seen"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("web1.example.com,1,log,80,"), "{first}");
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn graphml_prefers_host_nodes_and_adds_label_nodes() {
        let (hosts, edges) = fixture();
        let xml = render_graphml(&hosts, &edges);
        assert!(xml.contains("<graph id=\"keyspider\" edgedefault=\"directed\">"));
        // The known host renders once, as a host node.
        assert_eq!(xml.matches("<node id=\"host:1\">").count(), 1);
        // The bare-IP source renders as a label node.
        assert!(xml.contains("<node id=\"src:198.51.100.7\">"));
        assert!(xml.contains("<edge source=\"host:1\" target=\"host:1\">"));
        assert!(xml.contains("<edge source=\"src:198.51.100.7\" target=\"host:1\">"));
    }

    #[test]
    fn xml_metacharacters_are_escaped() {
        assert_eq!(
            xml_escape("a<b>&\"c'"),
            "a&lt;b&gt;&amp;&quot;c&apos;"
        );
    }
}
