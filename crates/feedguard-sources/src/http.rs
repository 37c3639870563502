//! Shared HTTP plumbing for the providers.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::{FetchError, Result};

const USER_AGENT: &str = "Feedguard/0.1";

/// Build the provider HTTP client with a bounded per-request timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// GET `url` and return the body text, classifying failures.
pub(crate) async fn get_text(client: &Client, url: &str) -> Result<String> {
    debug!(url, "GET");
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_transport(e, url))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let text = resp
        .text()
        .await
        .map_err(|e| classify_transport(e, url))?;

    if looks_like_challenge(&text) {
        return Err(FetchError::Challenge {
            url: url.to_string(),
        });
    }
    Ok(text)
}

fn classify_transport(error: reqwest::Error, url: &str) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Http(error)
    }
}

/// WAF interstitials often come back as 200 with a challenge page instead
/// of the feed. Treat them as transient: the challenge usually clears.
fn looks_like_challenge(body: &str) -> bool {
    body.contains("cf-challenge")
        || body.contains("__cf_chl_")
        || body.contains("Checking your browser before accessing")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_pages_are_detected() {
        assert!(looks_like_challenge(
            "<html><body>Checking your browser before accessing example.com</body></html>"
        ));
        assert!(!looks_like_challenge("<rss><channel></channel></rss>"));
    }
}
