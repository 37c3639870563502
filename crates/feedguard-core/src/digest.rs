//! Digest composition: plain-text mail bodies for both audiences.
//!
//! Rendering is pure; the daemon decides which audience receives which
//! body. The team digest additionally carries the degraded-units status
//! line so operators can see partial runs without the process failing.

use chrono::NaiveDate;

use crate::types::{ContentItem, Indicator, IndicatorKind, RunError, RunResult};

const RULE: &str = "==================================================";
const FOOTER: &str = "\n— Sent automatically by Feedguard\n";

pub fn news_subject(date: NaiveDate) -> String {
    format!("[Feedguard] Security News {date}")
}

pub fn advisory_subject(date: NaiveDate) -> String {
    format!("[Feedguard] Vulnerability Advisories {date}")
}

pub fn ioc_subject(date: NaiveDate) -> String {
    format!("[Feedguard] Malicious IOC {date}")
}

/// News-only digest body.
pub fn render_news(items: &[ContentItem], date: NaiveDate, errors: &[RunError]) -> String {
    let mut lines = vec![format!("Security News – {date}"), RULE.to_string()];
    lines.push("\n[ Security News ]".to_string());
    if items.is_empty() {
        lines.push("- (no new headlines today)".to_string());
    }
    lines.extend(items.iter().map(ContentItem::to_md));
    push_status(&mut lines, errors);
    lines.push(FOOTER.to_string());
    lines.join("\n")
}

/// Advisory-only digest body.
pub fn render_advisories(items: &[ContentItem], date: NaiveDate, errors: &[RunError]) -> String {
    let mut lines = vec![format!("Vulnerability Advisories – {date}"), RULE.to_string()];
    lines.push("\n[ Advisories ]".to_string());
    lines.extend(items.iter().map(|adv| match adv.published_at {
        Some(published) => format!("- **{published}** — [{}]({})", adv.title, adv.url),
        None => format!("- [{}]({})", adv.title, adv.url),
    }));
    push_status(&mut lines, errors);
    lines.push(FOOTER.to_string());
    lines.join("\n")
}

/// IOC digest body: per-kind counts followed by the values, then run
/// accounting and the status line.
pub fn render_iocs(indicators: &[Indicator], result: &RunResult, date: NaiveDate) -> String {
    let mut lines = vec![format!("Malicious IOC – {date}"), RULE.to_string()];
    lines.push("\n[ Daily IOC ]".to_string());

    for kind in [IndicatorKind::Ip, IndicatorKind::Hash, IndicatorKind::Url] {
        let values: Vec<&str> = indicators
            .iter()
            .filter(|i| i.kind == kind)
            .map(|i| i.value.as_str())
            .collect();
        lines.push(format!("- {} ({}):", kind_label(kind), values.len()));
        for value in values {
            lines.push(format!("    - {value}"));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Fetched {} item(s); {} new indicator(s); {} applied, {} failed.",
        result.items_fetched,
        result.indicators_new,
        result.indicators_applied,
        result.indicators_failed
    ));
    push_status(&mut lines, &result.errors);
    lines.push(FOOTER.to_string());
    lines.join("\n")
}

/// One line naming every degraded source/mechanism, or nothing for a clean
/// run.
pub fn status_line(errors: &[RunError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let units: Vec<String> = errors
        .iter()
        .map(|e| format!("{} ({})", e.unit, e.detail))
        .collect();
    Some(format!("Status: degraded — {}", units.join("; ")))
}

fn push_status(lines: &mut Vec<String>, errors: &[RunError]) {
    if let Some(status) = status_line(errors) {
        lines.push(String::new());
        lines.push(status);
    }
}

fn kind_label(kind: IndicatorKind) -> &'static str {
    match kind {
        IndicatorKind::Ip => "IP",
        IndicatorKind::Hash => "HASH",
        IndicatorKind::Url => "URL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunKind, SourceKind};
    use chrono::Utc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn news_body_lists_items_as_bullets() {
        let items = vec![ContentItem {
            source_kind: SourceKind::News,
            title: "Patch Tuesday roundup".into(),
            url: "https://news.example.net/patch".into(),
            published_at: Some(date()),
            body: String::new(),
        }];
        let body = render_news(&items, date(), &[]);
        assert!(body.contains("[ Security News ]"));
        assert!(body.contains("- [Patch Tuesday roundup](https://news.example.net/patch)"));
        assert!(!body.contains("Status: degraded"));
    }

    #[test]
    fn ioc_body_groups_by_kind_with_counts() {
        let indicators = vec![
            Indicator::new(IndicatorKind::Ip, "203.0.113.7", SourceKind::ThreatBlog),
            Indicator::new(
                IndicatorKind::Hash,
                "d41d8cd98f00b204e9800998ecf8427e",
                SourceKind::ThreatBlog,
            ),
        ];
        let mut result = RunResult::new(RunKind::Ioc, Utc::now());
        result.indicators_new = 2;
        result.indicators_applied = 2;

        let body = render_iocs(&indicators, &result, date());
        assert!(body.contains("- IP (1):"));
        assert!(body.contains("    - 203.0.113.7"));
        assert!(body.contains("- HASH (1):"));
        assert!(body.contains("- URL (0):"));
        assert!(body.contains("2 applied, 0 failed"));
    }

    #[test]
    fn status_line_names_each_degraded_unit() {
        let errors = vec![
            RunError {
                unit: "news".into(),
                detail: "HTTP 500".into(),
            },
            RunError {
                unit: "ipset".into(),
                detail: "binary missing".into(),
            },
        ];
        let status = status_line(&errors).unwrap();
        assert!(status.contains("news (HTTP 500)"));
        assert!(status.contains("ipset (binary missing)"));
    }

    #[test]
    fn clean_run_has_no_status_line() {
        assert!(status_line(&[]).is_none());
    }
}
