//! Minimal RSS/HTML field extraction shared by the feed-backed providers.
//!
//! The feeds involved are small and shallow, so field extraction runs on
//! compiled regexes rather than a full XML parser. Unparsable fragments are
//! skipped, never fatal.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("item regex"));

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link[^>]*>(.*?)</link>").expect("link regex"));

static DATE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:pubDate|dc:date)[^>]*>(.*?)</(?:pubDate|dc:date)>")
        .expect("pubdate regex")
});

static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<description[^>]*>(.*?)</description>").expect("description regex")
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("iso date regex"));

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").expect("script regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

/// One entry pulled out of an RSS channel.
#[derive(Debug, Clone)]
pub(crate) struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<NaiveDate>,
    pub summary: String,
}

/// Extract the `<item>` entries of an RSS document. Items missing a title
/// or link are skipped.
pub(crate) fn parse_rss(xml: &str) -> Vec<FeedEntry> {
    ITEM_RE
        .captures_iter(xml)
        .filter_map(|item| {
            let block = item.get(1)?.as_str();
            let title = field(&TITLE_RE, block)?;
            let link = field(&LINK_RE, block)?;
            Some(FeedEntry {
                title,
                link,
                published: field(&DATE_TAG_RE, block).as_deref().and_then(parse_date),
                summary: field(&DESCRIPTION_RE, block).unwrap_or_default(),
            })
        })
        .collect()
}

/// Whether a response body looks like a syndication document at all.
pub(crate) fn looks_like_feed(body: &str) -> bool {
    body.contains("<rss") || body.contains("<feed") || body.contains("<rdf")
}

/// Parse a feed date: ISO `YYYY-MM-DD` anywhere in the string, falling
/// back to RFC 2822 as used by classic RSS `pubDate`.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Some(m) = ISO_DATE_RE.find(raw) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d") {
            return Some(date);
        }
    }
    chrono::DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.date_naive())
}

/// Strip markup down to readable text: script/style blocks removed, tags
/// replaced by spaces, entities unescaped, whitespace collapsed.
pub(crate) fn strip_tags(html: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(html, " ");
    let without_tags = TAG_RE.replace_all(&without_scripts, " ");
    let unescaped = unescape(&without_tags);
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unwrap CDATA, unescape the common entities, and trim.
pub(crate) fn unescape(text: &str) -> String {
    text.trim()
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

fn field(re: &Regex, block: &str) -> Option<String> {
    let captured = re.captures(block)?.get(1)?.as_str();
    let cleaned = unescape(captured);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Feed</title>
    <item>
      <title><![CDATA[First headline]]></title>
      <link>https://news.example.net/1</link>
      <pubDate>Mon, 02 Jun 2025 09:00:00 +0900</pubDate>
      <description>Summary one &amp; more</description>
    </item>
    <item>
      <title>Second headline</title>
      <link>https://news.example.net/2</link>
      <pubDate>2025-06-01 10:00:00</pubDate>
    </item>
    <item>
      <title>No link, skipped</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_with_titles_and_links() {
        let entries = parse_rss(SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "First headline");
        assert_eq!(entries[0].link, "https://news.example.net/1");
        assert_eq!(entries[0].summary, "Summary one & more");
    }

    #[test]
    fn parses_both_date_styles() {
        let entries = parse_rss(SAMPLE);
        assert_eq!(
            entries[0].published,
            NaiveDate::from_ymd_opt(2025, 6, 2)
        );
        assert_eq!(
            entries[1].published,
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
    }

    #[test]
    fn strip_tags_flattens_markup() {
        let text = strip_tags(
            "<html><style>p{}</style><p>C2 at <b>203.0.113.7</b></p><script>x()</script></html>",
        );
        assert_eq!(text, "C2 at 203.0.113.7");
    }

    #[test]
    fn non_feed_bodies_are_recognised() {
        assert!(looks_like_feed(SAMPLE));
        assert!(!looks_like_feed("<html><body>oops</body></html>"));
    }
}
