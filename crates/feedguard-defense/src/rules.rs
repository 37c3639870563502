//! Suricata rule rendering and rules-file bookkeeping.
//!
//! Each indicator kind gets its own SID band so rules stay stable across
//! runs: the next SID in a band continues after the highest one already in
//! the file. Suricata reserves SIDs below 1M; these bands sit in the
//! private range.

use std::sync::LazyLock;

use regex::Regex;

use feedguard_core::types::{Indicator, IndicatorKind};

pub const BASE_SID_IP: u32 = 7_000_000;
pub const BASE_SID_URL: u32 = 7_100_000;
pub const BASE_SID_HASH: u32 = 7_200_000;

static MSG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"msg:"Feedguard malicious (IP|hash|URL) ([^"]+)""#).expect("msg regex")
});

static SID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sid:([0-9]+)").expect("sid regex"));

/// Render one drop rule, or `None` for a value the grammar cannot express.
pub fn render_rule(indicator: &Indicator, sid: u32) -> Option<String> {
    match indicator.kind {
        IndicatorKind::Ip => Some(format!(
            r#"drop ip {ip} any <> any any (msg:"Feedguard malicious IP {ip}"; sid:{sid}; rev:1;)"#,
            ip = indicator.value,
        )),
        IndicatorKind::Hash => {
            let keyword = match indicator.value.len() {
                32 => "filemd5",
                _ => "filesha256",
            };
            Some(format!(
                r#"drop tcp any any -> any any (msg:"Feedguard malicious hash {hash}"; {keyword}; content:"{hash}"; sid:{sid}; rev:1;)"#,
                hash = indicator.value,
            ))
        }
        IndicatorKind::Url => {
            let (host, uri) = split_url(&indicator.value)?;
            Some(format!(
                r#"drop http any any -> any any (msg:"Feedguard malicious URL {url}"; http.host; content:"{host}"; nocase; http.uri; content:"{uri}"; nocase; sid:{sid}; rev:1;)"#,
                url = indicator.value,
            ))
        }
    }
}

/// Host and request-URI components of a normalized URL indicator.
pub fn split_url(value: &str) -> Option<(String, String)> {
    let rest = value.split_once("://")?.1;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return None;
    }
    let host = match authority.rsplit_once(':') {
        Some((h, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => authority,
    };
    let uri = if path.is_empty() { "/" } else { path };
    Some((host.to_string(), uri.to_string()))
}

/// What the managed rules file already contains: indicator keys plus the
/// highest SID per band, so new rules extend rather than collide.
#[derive(Debug, Default)]
pub struct ExistingRules {
    present: std::collections::BTreeSet<String>,
    max_sid_ip: u32,
    max_sid_url: u32,
    max_sid_hash: u32,
}

impl ExistingRules {
    pub fn parse(content: &str) -> Self {
        let mut existing = Self::default();
        for line in content.lines() {
            let Some(caps) = MSG_RE.captures(line) else {
                continue;
            };
            let kind = match &caps[1] {
                "IP" => IndicatorKind::Ip,
                "hash" => IndicatorKind::Hash,
                _ => IndicatorKind::Url,
            };
            existing.present.insert(format!("{}:{}", kind, &caps[2]));
            if let Some(sid) = SID_RE
                .captures(line)
                .and_then(|c| c[1].parse::<u32>().ok())
            {
                let slot = existing.max_sid_slot(kind);
                if sid > *slot {
                    *slot = sid;
                }
            }
        }
        existing
    }

    pub fn contains(&self, indicator: &Indicator) -> bool {
        self.present.contains(&indicator.key())
    }

    pub fn rule_count(&self) -> usize {
        self.present.len()
    }

    /// Allocate the next SID in the indicator kind's band.
    pub fn next_sid(&mut self, kind: IndicatorKind) -> u32 {
        let base = match kind {
            IndicatorKind::Ip => BASE_SID_IP,
            IndicatorKind::Url => BASE_SID_URL,
            IndicatorKind::Hash => BASE_SID_HASH,
        };
        let slot = self.max_sid_slot(kind);
        *slot = (*slot).max(base) + 1;
        *slot
    }

    fn max_sid_slot(&mut self, kind: IndicatorKind) -> &mut u32 {
        match kind {
            IndicatorKind::Ip => &mut self.max_sid_ip,
            IndicatorKind::Url => &mut self.max_sid_url,
            IndicatorKind::Hash => &mut self.max_sid_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedguard_core::types::SourceKind;

    fn indicator(kind: IndicatorKind, value: &str) -> Indicator {
        Indicator::new(kind, value, SourceKind::ThreatBlog)
    }

    #[test]
    fn ip_rule_is_bidirectional() {
        let rule = render_rule(&indicator(IndicatorKind::Ip, "203.0.113.7"), 7_000_001).unwrap();
        assert_eq!(
            rule,
            r#"drop ip 203.0.113.7 any <> any any (msg:"Feedguard malicious IP 203.0.113.7"; sid:7000001; rev:1;)"#
        );
    }

    #[test]
    fn hash_rule_picks_digest_keyword_by_length() {
        let md5 = render_rule(
            &indicator(IndicatorKind::Hash, "d41d8cd98f00b204e9800998ecf8427e"),
            7_200_001,
        )
        .unwrap();
        assert!(md5.contains("filemd5"));

        let sha256 = render_rule(
            &indicator(
                IndicatorKind::Hash,
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            ),
            7_200_002,
        )
        .unwrap();
        assert!(sha256.contains("filesha256"));
    }

    #[test]
    fn url_rule_splits_host_and_uri() {
        let rule = render_rule(
            &indicator(IndicatorKind::Url, "http://bad-host.org:8080/drop.bin?x=1"),
            7_100_001,
        )
        .unwrap();
        assert!(rule.contains(r#"http.host; content:"bad-host.org"; nocase"#));
        assert!(rule.contains(r#"http.uri; content:"/drop.bin?x=1"; nocase"#));
    }

    #[test]
    fn url_without_path_uses_root_uri() {
        let (host, uri) = split_url("http://bad-host.org").unwrap();
        assert_eq!(host, "bad-host.org");
        assert_eq!(uri, "/");
    }

    #[test]
    fn parse_round_trips_rendered_rules() {
        let ip = indicator(IndicatorKind::Ip, "203.0.113.7");
        let hash = indicator(IndicatorKind::Hash, "d41d8cd98f00b204e9800998ecf8427e");
        let content = format!(
            "{}\n{}\n",
            render_rule(&ip, 7_000_001).unwrap(),
            render_rule(&hash, 7_200_005).unwrap(),
        );

        let existing = ExistingRules::parse(&content);
        assert!(existing.contains(&ip));
        assert!(existing.contains(&hash));
        assert!(!existing.contains(&indicator(IndicatorKind::Ip, "203.0.113.8")));
    }

    #[test]
    fn next_sid_continues_after_highest_in_band() {
        let ip = indicator(IndicatorKind::Ip, "203.0.113.7");
        let content = format!("{}\n", render_rule(&ip, 7_000_017).unwrap());
        let mut existing = ExistingRules::parse(&content);

        assert_eq!(existing.next_sid(IndicatorKind::Ip), 7_000_018);
        assert_eq!(existing.next_sid(IndicatorKind::Ip), 7_000_019);
        // Other bands are untouched by the ip rules.
        assert_eq!(existing.next_sid(IndicatorKind::Hash), 7_200_001);
        assert_eq!(existing.next_sid(IndicatorKind::Url), 7_100_001);
    }

    #[test]
    fn foreign_lines_are_ignored() {
        let existing =
            ExistingRules::parse("# comment\nalert tcp any any -> any any (sid:55;)\n");
        assert_eq!(existing.rule_count(), 0);
    }
}
