//! Normalization of authorized_keys material into canonical key identities.

use ssh_key::authorized_keys::Entry;
use ssh_key::HashAlg;
use std::str::FromStr;

/// A public key parsed from an authorized_keys line, reduced to its
/// canonical form. The SHA-256 fingerprint is the authoritative identity;
/// the re-serialized line is cosmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    pub key_type: String,
    /// Canonical `<algorithm> <base64>[ <comment>]` form, options stripped.
    pub authorized: String,
    pub comment: Option<String>,
    /// Standard `SHA256:<base64>` fingerprint.
    pub fingerprint_sha256: String,
}

/// Parse a single authorized_keys line. Option prefixes
/// (`command=…,from=…`) are tolerated and stripped; empty lines, comments
/// and undecodable material yield `None`.
pub fn parse_authorized_keys_line(line: &str) -> Option<AuthorizedKey> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let entry = Entry::from_str(line).ok()?;
    let key = entry.public_key();
    let authorized = key.to_openssh().ok()?;
    let comment = (!key.comment().is_empty()).then(|| key.comment().to_string());

    Some(AuthorizedKey {
        key_type: key.algorithm().to_string(),
        authorized,
        comment,
        fingerprint_sha256: key.fingerprint(HashAlg::Sha256).to_string(),
    })
}

/// Parse a whole authorized_keys file, skipping undecodable lines.
pub fn parse_authorized_keys_file(content: &str) -> Vec<AuthorizedKey> {
    content.lines().filter_map(parse_authorized_keys_line).collect()
}

/// Fingerprint of a bare `<algorithm> <base64>` public key line, as
/// produced by `ssh-keygen -y`.
pub fn fingerprint_from_public_key_line(line: &str) -> Option<String> {
    parse_authorized_keys_line(line).map(|key| key.fingerprint_sha256)
}

#[cfg(test)]
mod test {
    use super::{parse_authorized_keys_file, parse_authorized_keys_line};
    use pretty_assertions::assert_eq;

    // Fixture keys generated with ssh-keygen; fingerprints verified with
    // `ssh-keygen -lf`.
    const ED25519_LINE: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFDC3xoTz5d4jnI4OEV7+8rkNSEHXk6OnyqD/Yu/x+1C alice@bastion";
    const ED25519_FP: &str = "SHA256:FqKiTWN1NYRWMLFOrTnmD6e+SAOMiQZcqMtwshnj3zo";
    const RSA_LINE: &str =
        "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQDTMwwYFqZtwpdXoTLXezxqwLy5K40zM3p9uc6Gb5GIbzxhFe+/bVygXFXkmD8viKYsKALl5N87a9nTmF9klZFhrVtJxDez+iB09+XaC8tSo7Uj5eN2qEx9bA2lYrDjYnozwt9fudNeS2OckFlnbLH4Q39yfGaKTAwFDrRXh/I5a34fxvqhT+Nn0CMXfgTOMBgtzsQPE32HzhzVcb6k6nOJdWbnR+qUI5Vvigf+a7AdZoe0HbCUeinGAj7LIOfQGganA/XkPd3ouALqCGQ05J/RJRg7g1k3JeoUMuaEE57od1BFFjHv+mR/ts64XXaZZltGoGzAGmlVOu4TRjNsxfkP deploy@ci";
    const RSA_FP: &str = "SHA256:jweLMTWO3Mrc4Py9zweyFUBy8vWABpeJlcvzqdvsgng";

    #[test]
    fn ed25519_line_parses_to_canonical_form() {
        let key = parse_authorized_keys_line(ED25519_LINE).unwrap();
        assert_eq!(key.key_type, "ssh-ed25519");
        assert_eq!(key.authorized, ED25519_LINE);
        assert_eq!(key.comment.as_deref(), Some("alice@bastion"));
        assert_eq!(key.fingerprint_sha256, ED25519_FP);
    }

    #[test]
    fn rsa_fingerprint_matches_ssh_keygen() {
        let key = parse_authorized_keys_line(RSA_LINE).unwrap();
        assert_eq!(key.key_type, "ssh-rsa");
        assert_eq!(key.fingerprint_sha256, RSA_FP);
    }

    #[test]
    fn option_prefixes_are_stripped() {
        let line = format!("command=\"/usr/bin/true\",no-pty,from=\"10.0.0.0/8\" {ED25519_LINE}");
        let key = parse_authorized_keys_line(&line).unwrap();
        assert_eq!(key.authorized, ED25519_LINE);
        assert_eq!(key.fingerprint_sha256, ED25519_FP);
    }

    #[test]
    fn parse_of_formatted_key_round_trips() {
        let key = parse_authorized_keys_line(ED25519_LINE).unwrap();
        let again = parse_authorized_keys_line(&key.authorized).unwrap();
        assert_eq!(key, again);
    }

    #[test]
    fn key_without_comment_has_none() {
        let bare = ED25519_LINE.rsplit_once(' ').unwrap().0;
        let key = parse_authorized_keys_line(bare).unwrap();
        assert_eq!(key.comment, None);
        assert_eq!(key.fingerprint_sha256, ED25519_FP);
    }

    #[test]
    fn junk_lines_are_rejected() {
        for line in [
            "",
            "   ",
            "# a comment",
            "not-a-key AAAA alice",
            "ssh-ed25519 %%%invalid-base64%%% x",
        ] {
            assert_eq!(parse_authorized_keys_line(line), None, "{line:?}");
        }
    }

    #[test]
    fn file_parse_skips_bad_lines() {
        let content = format!("# managed by keyspider\n\n{ED25519_LINE}\ngarbage here\n{RSA_LINE}\n");
        let keys = parse_authorized_keys_file(&content);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].fingerprint_sha256, ED25519_FP);
        assert_eq!(keys[1].fingerprint_sha256, RSA_FP);
    }
}
