//! Denmark: the central business register company page.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use vendorlens_shared::{
    CountryCode, EnrichmentResult, FetchError, IdentifierKey, Result, VendorLensError,
};

use super::{page_mentions_any, require_fields};
use crate::fetcher::{FetchResult, SourceFetcher, validate_digits};
use crate::http::PageRenderer;
use crate::normalize::{clean_activity_code, clean_company_name, clean_description, collapse_whitespace};

const NOT_FOUND_MARKERS: &[&str] = &["Ingen resultater", "No results found"];

/// Label preceding the industry code on the company page.
const ACTIVITY_LABEL: &str = "Branchekode";

static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1.h2").expect("valid selector"));
static STRONG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("strong").expect("valid selector"));

/// Scrapes Danish companies by CVR number.
pub struct DkCvrScraper {
    renderer: Arc<dyn PageRenderer>,
    base_url: Url,
}

impl DkCvrScraper {
    /// `base_url` must be hierarchical; the CVR number is appended as a path segment.
    pub fn new(base_url: Url, renderer: Arc<dyn PageRenderer>) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(VendorLensError::config(format!(
                "CVR base URL cannot carry a path: {base_url}"
            )));
        }
        Ok(Self { renderer, base_url })
    }

    fn page_url(&self, cvr: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(cvr);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("fritekst", cvr)
            .append_pair("sideIndex", "0")
            .append_pair("size", "10");
        url
    }
}

#[async_trait]
impl SourceFetcher for DkCvrScraper {
    fn country(&self) -> CountryCode {
        CountryCode::Dk
    }

    fn name(&self) -> &str {
        "datacvr"
    }

    fn max_concurrency(&self) -> usize {
        2
    }

    fn base_latency(&self) -> Duration {
        Duration::from_secs(4)
    }

    fn min_request_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// CVR: exactly eight digits.
    fn validate(&self, key: &IdentifierKey) -> FetchResult<()> {
        validate_digits(key, key.registry_number(), 8..=8)
    }

    async fn fetch(&self, key: &IdentifierKey, timeout: Duration) -> FetchResult<EnrichmentResult> {
        let url = self.page_url(key.registry_number());
        debug!(%key, %url, "scraping company page");

        let html = self.renderer.render(&url, timeout).await?;
        parse_company_page(&html, key)
    }
}

pub(crate) fn parse_company_page(html: &str, key: &IdentifierKey) -> FetchResult<EnrichmentResult> {
    let doc = Html::parse_document(html);

    if page_mentions_any(&doc, NOT_FOUND_MARKERS) {
        return Err(FetchError::not_found(key));
    }

    let company_name = doc
        .select(&NAME)
        .next()
        .and_then(|h| clean_company_name(&h.text().collect::<String>()));
    let activity = extract_activity(&doc);
    let (company_name, (activity_code, activity_description)) =
        require_fields(key, company_name, activity)?;

    Ok(EnrichmentResult {
        company_name,
        activity_code,
        activity_description,
        source_timestamp: Utc::now(),
    })
}

/// The label sits in its own block; the value is the next sibling element,
/// formatted `<code> <description>`.
fn extract_activity(doc: &Html) -> Option<(String, String)> {
    let label = doc
        .select(&STRONG)
        .find(|s| s.text().collect::<String>().contains(ACTIVITY_LABEL))?;
    let block = label.parent().and_then(ElementRef::wrap)?;
    let value = block.next_siblings().find_map(ElementRef::wrap)?;

    let text = collapse_whitespace(&value.text().collect::<String>());
    let (code, description) = text.split_once(' ')?;
    Some((clean_activity_code(code)?, clean_description(description)?))
}
