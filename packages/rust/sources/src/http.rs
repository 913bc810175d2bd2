//! HTTP plumbing shared by all sources, and the page-rendering seam used by
//! the scraping fetchers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use vendorlens_shared::{FetchError, Result, VendorLensError};

use crate::fetcher::FetchResult;

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("VendorLens/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used by the API fetcher and the default renderer.
///
/// No client-wide timeout: each request carries the per-call timeout.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| VendorLensError::Network(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success HTTP status to a fetch error.
///
/// Only 404 is treated as a definitive answer; everything else may clear up
/// on retry.
pub(crate) fn classify_status(status: StatusCode, url: &Url) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => FetchError::hard(format!("not found: {url}")),
        StatusCode::TOO_MANY_REQUESTS => FetchError::soft(format!("rate limited: {url}")),
        s => FetchError::soft(format!("{url}: HTTP {s}")),
    })
}

/// Transport errors (connect, timeout, body read) are always transient.
pub(crate) fn classify_transport(err: &reqwest::Error, url: &Url) -> FetchError {
    if err.is_timeout() {
        FetchError::soft(format!("{url}: request timed out"))
    } else {
        FetchError::soft(format!("{url}: {err}"))
    }
}

// ---------------------------------------------------------------------------
// PageRenderer
// ---------------------------------------------------------------------------

/// Produces the HTML of a page as a browser would see it.
///
/// The scraping fetchers only depend on this trait. [`HttpRenderer`] is a
/// plain GET; a headless-browser implementation can be injected instead for
/// pages that need script execution. Any pooled browser session behind an
/// implementation must tolerate the owning fetcher's declared concurrency.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url, timeout: Duration) -> FetchResult<String>;
}

/// Renderer that fetches the server-side HTML with reqwest.
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &Url, timeout: Duration) -> FetchResult<String> {
        debug!(%url, "rendering page");

        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport(&e, url))?;

        if let Some(err) = classify_status(response.status(), url) {
            return Err(err);
        }

        response.text().await.map_err(|e| classify_transport(&e, url))
    }
}
