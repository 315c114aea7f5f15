//! Extraction of "Accepted publickey" events from OpenSSH sshd logs.
//!
//! Two line shapes are recognized: classic syslog (`Feb  3 22:01:02 host
//! sshd[123]: ...`), whose year-less timestamp is resolved against an
//! injected clock, and journalctl `--output=short-iso` lines that begin
//! with an RFC3339 timestamp. Anything else is silently skipped.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub ts: DateTime<Utc>,
    pub dest_user: String,
    pub source_ip: String,
    pub source_port: i32,
    pub fingerprint_sha256: Option<String>,
    pub auth_method: &'static str,
    pub result: &'static str,
}

lazy_static! {
    // Permissive on purpose: sshd phrasing varies slightly across versions,
    // but the user/ip/port/fingerprint fields are stable.
    static ref ACCEPTED_PUBKEY: Regex = Regex::new(
        r"(?i)Accepted\s+publickey\s+for\s+(?P<user>\S+)\s+from\s+(?P<ip>\S+)\s+port\s+(?P<port>\d+)\s+ssh2:.*?SHA256:[A-Za-z0-9+/=_-]+"
    )
    .expect("accepted-publickey regex");
    static ref ACCEPTED_PUBKEY_ISO: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}.*?Accepted\s+publickey\s+for\s+(?P<user>\S+)\s+from\s+(?P<ip>\S+)\s+port\s+(?P<port>\d+).*?SHA256:[A-Za-z0-9+/=_-]+"
    )
    .expect("accepted-publickey short-iso regex");
}

pub struct LinuxSshdParser {
    now: fn() -> DateTime<Utc>,
    offset: FixedOffset,
}

impl LinuxSshdParser {
    /// A parser interpreting syslog wall-clock times in the local timezone.
    pub fn new(now: fn() -> DateTime<Utc>) -> Self {
        Self {
            now,
            offset: *Local::now().offset(),
        }
    }

    /// Test seam: pin both the clock and the syslog timezone.
    pub fn with_offset(now: fn() -> DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { now, offset }
    }

    /// Parse an accepted-publickey line, stamping it with the current time.
    /// Used for bulk log ingestion, where line timestamps are close enough
    /// to "now" that the scan records observation time.
    pub fn parse_line(&self, line: &str) -> Option<ParsedEvent> {
        let caps = ACCEPTED_PUBKEY.captures(line)?;
        Some(ParsedEvent {
            ts: (self.now)(),
            dest_user: caps["user"].to_string(),
            source_ip: caps["ip"].to_string(),
            source_port: caps["port"].parse().unwrap_or(0),
            fingerprint_sha256: fingerprint_token(line),
            auth_method: "publickey",
            result: "accepted",
        })
    }

    /// Parse both journalctl short-iso and classic syslog lines, recovering
    /// the line's own timestamp.
    pub fn parse_line_enhanced(&self, line: &str) -> Option<ParsedEvent> {
        if let Some(caps) = ACCEPTED_PUBKEY_ISO.captures(line) {
            let first = line.split_whitespace().next()?;
            if let Ok(ts) = DateTime::parse_from_rfc3339(first) {
                return Some(ParsedEvent {
                    ts: ts.with_timezone(&Utc),
                    dest_user: caps["user"].to_string(),
                    source_ip: caps["ip"].to_string(),
                    source_port: caps["port"].parse().unwrap_or(0),
                    fingerprint_sha256: fingerprint_token(line),
                    auth_method: "publickey",
                    result: "accepted",
                });
            }
        }

        // Syslog timestamps occupy a fixed 15-character prefix.
        let prefix = line.get(..15)?;
        let now_local = (self.now)().with_timezone(&self.offset);
        let ts = parse_syslog_ts(now_local, prefix)?;
        let mut ev = self.parse_line(line)?;
        ev.ts = ts;
        Some(ev)
    }
}

/// Resolve a year-less syslog timestamp like `Feb  3 22:01:02` against
/// `now`: assume the current year, and step back one year if that lands
/// more than 24 hours in the future (log rollover across new year).
fn parse_syslog_ts(now: DateTime<FixedOffset>, prefix: &str) -> Option<DateTime<Utc>> {
    let mut parts = prefix.split_whitespace();
    let month = month_number(parts.next()?)?;
    let day: u32 = parts.next()?.parse().ok()?;
    let hms = parts.next()?;

    let mut hms_parts = hms.split(':');
    let (hh, mm, ss) = (hms_parts.next()?, hms_parts.next()?, hms_parts.next()?);
    if hms_parts.next().is_some() {
        return None;
    }
    let hh: u32 = hh.parse().unwrap_or(0);
    let mm: u32 = mm.parse().unwrap_or(0);
    let ss: u32 = ss.parse().unwrap_or(0);

    let tz = now.timezone();
    let mut ts = tz.with_ymd_and_hms(now.year(), month, day, hh, mm, ss).single()?;
    if ts > now + Duration::hours(24) {
        ts = tz
            .with_ymd_and_hms(now.year() - 1, month, day, hh, mm, ss)
            .single()?;
    }
    Some(ts.with_timezone(&Utc))
}

fn month_number(name: &str) -> Option<u32> {
    Some(match name {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    })
}

/// Locate the fingerprint by token scan rather than trusting the regex
/// capture: field ordering after `ssh2:` varies across sshd versions.
fn fingerprint_token(line: &str) -> Option<String> {
    line.split_whitespace()
        .find(|token| token.starts_with("SHA256:"))
        .map(|token| token.to_string())
}

#[cfg(test)]
mod test {
    use super::{LinuxSshdParser, ParsedEvent};
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn june_2024() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn utc_parser() -> LinuxSshdParser {
        LinuxSshdParser::with_offset(june_2024, FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn syslog_line_resolves_within_current_year() {
        let line = "Feb  3 22:01:02 h sshd[1]: Accepted publickey for root from 10.0.0.5 port 2222 ssh2: ED25519 SHA256:AAAA1111";
        let ev = utc_parser().parse_line_enhanced(line).unwrap();
        assert_eq!(
            ev,
            ParsedEvent {
                ts: Utc.with_ymd_and_hms(2024, 2, 3, 22, 1, 2).unwrap(),
                dest_user: "root".to_string(),
                source_ip: "10.0.0.5".to_string(),
                source_port: 2222,
                fingerprint_sha256: Some("SHA256:AAAA1111".to_string()),
                auth_method: "publickey",
                result: "accepted",
            }
        );
    }

    #[test]
    fn syslog_timestamp_over_24h_in_future_rolls_back_a_year() {
        fn new_years() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        }
        let parser =
            LinuxSshdParser::with_offset(new_years, FixedOffset::east_opt(0).unwrap());
        let line = "Dec 31 23:59:59 h sshd[1]: Accepted publickey for ops from 10.0.0.9 port 40000 ssh2: ED25519 SHA256:Zz99";
        let ev = parser.parse_line_enhanced(line).unwrap();
        assert_eq!(ev.ts, Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn syslog_timestamp_less_than_24h_ahead_stays_in_current_year() {
        let line = "Jun  1 20:00:00 h sshd[1]: Accepted publickey for ops from 10.0.0.9 port 40000 ssh2: ED25519 SHA256:Zz99";
        let ev = utc_parser().parse_line_enhanced(line).unwrap();
        assert_eq!(ev.ts, Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap());
    }

    #[test]
    fn short_iso_line_parses_its_own_timestamp() {
        let line = "2024-02-03T22:01:02+00:00 h sshd[7]: Accepted publickey for deploy from 192.0.2.10 port 50000 ssh2: RSA SHA256:abcDEF";
        let ev = utc_parser().parse_line_enhanced(line).unwrap();
        assert_eq!(ev.ts, Utc.with_ymd_and_hms(2024, 2, 3, 22, 1, 2).unwrap());
        assert_eq!(ev.dest_user, "deploy");
        assert_eq!(ev.source_ip, "192.0.2.10");
        assert_eq!(ev.source_port, 50000);
        assert_eq!(ev.fingerprint_sha256.as_deref(), Some("SHA256:abcDEF"));
    }

    #[test]
    fn short_iso_offset_without_colon_is_rejected() {
        // journalctl emits `-0500`-style offsets on some systems; the strict
        // RFC3339 parse rejects those and the syslog fallback cannot apply.
        let line = "2024-02-03T22:01:02-0500 h sshd[7]: Accepted publickey for deploy from 192.0.2.10 port 50000 ssh2: RSA SHA256:abcDEF";
        assert_eq!(utc_parser().parse_line_enhanced(line), None);
    }

    #[test]
    fn basic_parse_stamps_the_injected_clock() {
        let line = "Feb  3 22:01:02 h sshd[1]: Accepted publickey for root from 10.0.0.5 port 2222 ssh2: ED25519 SHA256:AAAA1111";
        let ev = utc_parser().parse_line(line).unwrap();
        assert_eq!(ev.ts, june_2024());
    }

    #[test]
    fn lines_without_a_fingerprint_do_not_parse() {
        let line = "Feb  3 22:01:02 h sshd[1]: Accepted publickey for root from 10.0.0.5 port 2222 ssh2: ED25519";
        assert_eq!(utc_parser().parse_line(line), None);
    }

    #[test]
    fn unrelated_lines_are_skipped() {
        for line in [
            "Feb  3 22:01:02 h sshd[1]: Failed password for root from 10.0.0.5 port 2222 ssh2",
            "Feb  3 22:01:02 h sshd[1]: Connection closed by 10.0.0.5 port 2222",
            "",
            "-- Logs begin at Mon 2024-01-01 00:00:00 UTC. --",
        ] {
            assert_eq!(utc_parser().parse_line_enhanced(line), None, "{line:?}");
        }
    }

    #[test]
    fn fingerprint_is_found_by_token_scan() {
        // Extra fields between ssh2: and the fingerprint must not matter.
        let line = "Feb  3 22:01:02 h sshd[1]: Accepted publickey for git from 203.0.113.4 port 993 ssh2: ECDSA-CERT ID abc SHA256:tokenScan42 serial 9";
        let ev = utc_parser().parse_line(line).unwrap();
        assert_eq!(ev.fingerprint_sha256.as_deref(), Some("SHA256:tokenScan42"));
    }
}
