//! IOC extraction: regex grammars plus false-positive policy filters.
//!
//! The extractor recognises three indicator grammars — IPv4 dotted-quad,
//! MD5/SHA-256 hex digests, and URLs — and applies two suppression
//! policies: private/reserved IPv4 ranges, and an allow-list of benign
//! hosts that show up in article boilerplate. Malformed fragments are
//! skipped; extraction never fails.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::types::{ContentItem, Indicator, IndicatorKind, SourceKind};

static IP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|1?[0-9]{1,2})\.){3}(?:25[0-5]|2[0-4][0-9]|1?[0-9]{1,2})\b",
    )
    .expect("ipv4 regex")
});

// 64-hex (SHA-256) listed before 32-hex (MD5); the word boundaries keep a
// long digest from also matching as its halves.
static HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Fa-f0-9]{64}\b|\b[A-Fa-f0-9]{32}\b").expect("hash regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[A-Za-z0-9._-]+(?::[0-9]{1,5})?(?:/[^\s'"<>]*)?"#)
        .expect("url regex")
});

/// The IOC extraction engine. Build once, reuse across runs.
#[derive(Debug, Clone)]
pub struct IocExtractor {
    allow_hosts: Vec<String>,
}

impl IocExtractor {
    pub fn new(allow_hosts: Vec<String>) -> Self {
        let allow_hosts = allow_hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { allow_hosts }
    }

    /// Extract the deduplicated indicator set from a batch of content.
    ///
    /// Dedup is on `(kind, value)` across all items; the first source to
    /// mention an indicator wins the provenance field.
    pub fn extract(&self, items: &[ContentItem]) -> BTreeSet<Indicator> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut out = BTreeSet::new();
        for item in items {
            let text = refang(&format!("{}\n{}", item.title, item.body));
            self.extract_from_text(&text, item.source_kind, &mut seen, &mut out);
        }
        debug!(items = items.len(), indicators = out.len(), "extraction finished");
        out
    }

    fn extract_from_text(
        &self,
        text: &str,
        source_kind: SourceKind,
        seen: &mut BTreeSet<String>,
        out: &mut BTreeSet<Indicator>,
    ) {
        for m in IP_RE.find_iter(text) {
            let Ok(ip) = m.as_str().parse::<Ipv4Addr>() else {
                continue;
            };
            if is_suppressed_ipv4(ip) {
                continue;
            }
            push_unique(
                Indicator::new(IndicatorKind::Ip, ip.to_string(), source_kind),
                seen,
                out,
            );
        }

        for m in HASH_RE.find_iter(text) {
            // Length fixes the digest family; the value never changes kind.
            let value = m.as_str().to_ascii_lowercase();
            push_unique(
                Indicator::new(IndicatorKind::Hash, value, source_kind),
                seen,
                out,
            );
        }

        for m in URL_RE.find_iter(text) {
            let value = normalize_url(m.as_str());
            let Some(host) = url_host(&value) else {
                continue;
            };
            if self.host_allowed(host) {
                continue;
            }
            push_unique(
                Indicator::new(IndicatorKind::Url, value, source_kind),
                seen,
                out,
            );
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.allow_hosts
            .iter()
            .any(|allow| host == allow || host.ends_with(&format!(".{allow}")))
    }
}

fn push_unique(indicator: Indicator, seen: &mut BTreeSet<String>, out: &mut BTreeSet<Indicator>) {
    if seen.insert(indicator.key()) {
        out.insert(indicator);
    }
}

/// Undo common defanging so the grammars match what the article means.
fn refang(text: &str) -> String {
    text.replace("[.]", ".")
        .replace("[:]", ":")
        .replace("hxxps://", "https://")
        .replace("hxxp://", "http://")
}

/// Addresses that are never actionable blocklist entries: RFC 1918,
/// loopback, link-local, multicast/broadcast, unspecified, 0/8, and the
/// RFC 6598 shared range. Documentation/TEST-NET ranges stay: threat
/// reports cite them as live infrastructure.
fn is_suppressed_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || octets[0] == 0
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
}

/// Canonical URL form: lower-case scheme and authority, path preserved,
/// trailing sentence punctuation stripped.
fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(|c| {
        matches!(c, '.' | ',' | ';' | ':' | ')' | ']' | '}' | '>' | '"' | '\'')
    });
    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (authority, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                authority.to_ascii_lowercase(),
                path
            )
        }
        None => trimmed.to_string(),
    }
}

/// Host component of a normalized URL, without the port.
fn url_host(normalized: &str) -> Option<&str> {
    let rest = normalized.split_once("://")?.1;
    let authority = rest.split('/').next().unwrap_or(rest);
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => Some(host),
        _ => Some(authority),
    }
}
