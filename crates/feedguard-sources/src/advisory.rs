//! Vulnerability advisory provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use feedguard_core::types::{ContentItem, SourceKind};

use crate::error::{FetchError, Result};
use crate::feed::{looks_like_feed, parse_rss};
use crate::http::{build_client, get_text};
use crate::provider::SourceProvider;

const DEFAULT_FEED: &str = "https://knvd.krcert.or.kr/rss/securityNotice.do";

pub const ADVISORY_LIMIT_MIN: usize = 1;
pub const ADVISORY_LIMIT_MAX: usize = 50;

/// Security-notice RSS provider, newest entries first as published.
pub struct AdvisoryProvider {
    client: Client,
    feed_url: String,
}

impl AdvisoryProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_feed(DEFAULT_FEED.to_string(), timeout)
    }

    pub fn with_feed(feed_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            feed_url,
        })
    }
}

#[async_trait]
impl SourceProvider for AdvisoryProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Advisory
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(ADVISORY_LIMIT_MIN, ADVISORY_LIMIT_MAX)
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>> {
        let limit = self.clamp_limit(limit);
        let body = get_text(&self.client, &self.feed_url).await?;
        if !looks_like_feed(&body) {
            return Err(FetchError::Malformed {
                url: self.feed_url.clone(),
                detail: "response is not a syndication document".into(),
            });
        }

        let items: Vec<ContentItem> = parse_rss(&body)
            .into_iter()
            .take(limit)
            .map(|entry| ContentItem {
                source_kind: SourceKind::Advisory,
                title: entry.title,
                url: entry.link,
                published_at: entry.published,
                body: entry.summary,
            })
            .collect();

        info!(count = items.len(), "fetched advisories");
        Ok(items)
    }
}
