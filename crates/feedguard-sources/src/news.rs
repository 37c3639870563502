//! Security news headline provider.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use feedguard_core::types::{ContentItem, SourceKind};

use crate::error::{FetchError, Result};
use crate::feed::{looks_like_feed, parse_rss};
use crate::http::{build_client, get_text};
use crate::provider::SourceProvider;

const DEFAULT_FEEDS: &[&str] = &["https://www.boannews.com/media/news_rss.xml"];

pub const NEWS_LIMIT_MIN: usize = 1;
pub const NEWS_LIMIT_MAX: usize = 50;

/// Headline provider merging one or more RSS feeds, newest first.
pub struct NewsProvider {
    client: Client,
    feed_urls: Vec<String>,
}

impl NewsProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_feeds(
            DEFAULT_FEEDS.iter().map(|s| s.to_string()).collect(),
            timeout,
        )
    }

    /// Provider over explicit feed URLs (tests point this at a local mock).
    pub fn with_feeds(feed_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            feed_urls,
        })
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<ContentItem>> {
        let body = get_text(&self.client, url).await?;
        if !looks_like_feed(&body) {
            return Err(FetchError::Malformed {
                url: url.to_string(),
                detail: "response is not a syndication document".into(),
            });
        }
        Ok(parse_rss(&body)
            .into_iter()
            .map(|entry| ContentItem {
                source_kind: SourceKind::News,
                title: entry.title,
                url: entry.link,
                published_at: entry.published,
                body: entry.summary,
            })
            .collect())
    }
}

#[async_trait]
impl SourceProvider for NewsProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::News
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(NEWS_LIMIT_MIN, NEWS_LIMIT_MAX)
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>> {
        let limit = self.clamp_limit(limit);

        let mut items = Vec::new();
        let mut last_error = None;
        for url in &self.feed_urls {
            match self.fetch_feed(url).await {
                Ok(fetched) => items.extend(fetched),
                Err(error) => {
                    warn!(feed = url.as_str(), error = %error, "skipping news feed");
                    last_error = Some(error);
                }
            }
        }
        // Every feed failed: surface the failure instead of an empty run.
        if items.is_empty() {
            if let Some(error) = last_error {
                return Err(error);
            }
        }

        items.sort_by_key(|item| Reverse(item.published_at));

        let mut seen = HashSet::new();
        let mut merged: Vec<ContentItem> = Vec::new();
        for item in items {
            if !seen.insert(item.url.clone()) {
                continue;
            }
            merged.push(item);
            if merged.len() >= limit {
                break;
            }
        }

        info!(count = merged.len(), "merged news headlines");
        Ok(merged)
    }
}
