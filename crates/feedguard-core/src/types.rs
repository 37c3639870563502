//! Shared domain types for the Feedguard pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// The fixed set of content sources. New kinds are a deliberate code change,
/// not runtime configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Advisory,
    ThreatBlog,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::News => write!(f, "news"),
            SourceKind::Advisory => write!(f, "advisory"),
            SourceKind::ThreatBlog => write!(f, "threat-blog"),
        }
    }
}

/// A single fetched piece of content. Immutable once fetched; lives for the
/// duration of one run and is discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub source_kind: SourceKind,
    pub title: String,
    pub url: String,
    pub published_at: Option<NaiveDate>,
    pub body: String,
}

impl ContentItem {
    /// Markdown bullet line used by the digest composer.
    pub fn to_md(&self) -> String {
        match self.published_at {
            Some(date) => format!("- [{}]({}) ({})", self.title, self.url, date),
            None => format!("- [{}]({})", self.title, self.url),
        }
    }
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Indicator grammars recognised by the extractor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Ip,
    Hash,
    Url,
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorKind::Ip => write!(f, "ip"),
            IndicatorKind::Hash => write!(f, "hash"),
            IndicatorKind::Url => write!(f, "url"),
        }
    }
}

/// A normalized indicator of compromise.
///
/// `value` is canonical: lower-case hex for hashes, dotted-quad for IPs,
/// normalized scheme+host+path for URLs. Uniqueness is on `(kind, value)`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub value: String,
    pub source_kind: SourceKind,
}

impl Indicator {
    pub fn new(kind: IndicatorKind, value: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            kind,
            value: value.into(),
            source_kind,
        }
    }

    /// Store key. The source is provenance, not identity.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.value)
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// The two independent pipeline timelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Digest,
    Ioc,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Digest => write!(f, "digest"),
            RunKind::Ioc => write!(f, "ioc"),
        }
    }
}

/// A degraded unit (source or mechanism) within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub unit: String,
    pub detail: String,
}

/// Outcome of a single orchestrator run. Consumed by the digest composer,
/// then discarded; never persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub items_fetched: usize,
    pub indicators_new: usize,
    pub indicators_applied: usize,
    pub indicators_failed: usize,
    pub errors: Vec<RunError>,
}

impl RunResult {
    pub fn new(run_kind: RunKind, started_at: DateTime<Utc>) -> Self {
        Self {
            run_kind,
            started_at,
            items_fetched: 0,
            indicators_new: 0,
            indicators_applied: 0,
            indicators_failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, unit: impl Into<String>, detail: impl Into<String>) {
        self.errors.push(RunError {
            unit: unit.into(),
            detail: detail.into(),
        });
    }

    /// Whether every unit completed cleanly.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Audiences
// ---------------------------------------------------------------------------

/// Digest recipient audiences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Team,
    Customer,
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Team => write!(f, "team"),
            Audience::Customer => write!(f, "customer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_key_is_kind_and_value() {
        let ind = Indicator::new(IndicatorKind::Ip, "203.0.113.7", SourceKind::ThreatBlog);
        assert_eq!(ind.key(), "ip:203.0.113.7");
    }

    #[test]
    fn indicator_key_ignores_source() {
        let a = Indicator::new(IndicatorKind::Hash, "abc", SourceKind::News);
        let b = Indicator::new(IndicatorKind::Hash, "abc", SourceKind::ThreatBlog);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn content_item_markdown_includes_date_when_present() {
        let item = ContentItem {
            source_kind: SourceKind::News,
            title: "Headline".into(),
            url: "https://example.com/a".into(),
            published_at: NaiveDate::from_ymd_opt(2025, 6, 1),
            body: String::new(),
        };
        assert_eq!(
            item.to_md(),
            "- [Headline](https://example.com/a) (2025-06-01)"
        );
    }
}
