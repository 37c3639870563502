//! Threat-analysis blog provider.
//!
//! The blog exposes no feed, so the provider scrapes the index page for
//! recent post links and then pulls each post body down to plain text for
//! the extractor. The link selector is the one piece that tracks the site's
//! markup; everything else is generic.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{info, warn};

use feedguard_core::types::{ContentItem, SourceKind};

use crate::error::{FetchError, Result};
use crate::feed::{strip_tags, unescape};
use crate::http::{build_client, get_text};
use crate::provider::SourceProvider;

const DEFAULT_BASE_URL: &str = "https://asec.ahnlab.com";

pub const BLOG_LIMIT_MIN: usize = 1;
pub const BLOG_LIMIT_MAX: usize = 20;

static POST_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<h2[^>]*class="[^"]*entry-title[^"]*"[^>]*>\s*<a[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#,
    )
    .expect("post link regex")
});

/// Scraping provider over the malware-analysis blog.
pub struct ThreatBlogProvider {
    client: Client,
    base_url: String,
}

impl ThreatBlogProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), timeout)
    }

    pub fn with_base_url(base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url,
        })
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                href.trim_start_matches('/')
            )
        }
    }
}

#[async_trait]
impl SourceProvider for ThreatBlogProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::ThreatBlog
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(BLOG_LIMIT_MIN, BLOG_LIMIT_MAX)
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>> {
        let limit = self.clamp_limit(limit);
        let index = get_text(&self.client, &self.base_url).await?;

        let posts: Vec<(String, String)> = POST_LINK_RE
            .captures_iter(&index)
            .filter_map(|cap| {
                let href = cap.get(1)?.as_str();
                let title = unescape(cap.get(2)?.as_str());
                if title.is_empty() {
                    return None;
                }
                Some((self.absolute(href), title))
            })
            .take(limit)
            .collect();

        // Selector drift on the index page would silently feed the pipeline
        // nothing; make it a visible permanent failure instead.
        if posts.is_empty() {
            return Err(FetchError::Malformed {
                url: self.base_url.clone(),
                detail: "no post links matched the index page".into(),
            });
        }

        let mut items = Vec::new();
        for (url, title) in posts {
            match get_text(&self.client, &url).await {
                Ok(html) => items.push(ContentItem {
                    source_kind: SourceKind::ThreatBlog,
                    title,
                    url,
                    published_at: None,
                    body: strip_tags(&html),
                }),
                Err(error) => {
                    warn!(post = url.as_str(), error = %error, "skipping unreadable post");
                }
            }
        }

        info!(count = items.len(), "fetched threat-blog posts");
        Ok(items)
    }
}
