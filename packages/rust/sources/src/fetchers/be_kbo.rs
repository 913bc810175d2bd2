//! Belgium: the public enterprise register search page.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use vendorlens_shared::{CountryCode, EnrichmentResult, FetchError, IdentifierKey};

use super::{page_mentions_any, require_fields};
use crate::fetcher::{FetchResult, SourceFetcher, validate_digits};
use crate::http::PageRenderer;
use crate::normalize::{clean_activity_code, clean_company_name, clean_description, collapse_whitespace};

/// Page texts the register shows when the number does not exist.
const NOT_FOUND_MARKERS: &[&str] = &[
    "No data found",
    "Geen gegevens gevonden",
    "Aucune donnée trouvée",
];

static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static ACTIVITY_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.QL").expect("valid selector"));

static NSSO_2025: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"NSSO2025\s+([\d.]+)\s*-\s*(.*?)(?:\s+Since|$)").expect("valid NSSO regex")
});
static VAT_2008: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"VAT ?2008\s+([\d.]+)\s*-\s*(.*?)(?:\s+Since|$)").expect("valid VAT regex")
});

/// Scrapes Belgian enterprises by enterprise number.
pub struct BeKboScraper {
    renderer: Arc<dyn PageRenderer>,
    base_url: Url,
}

impl BeKboScraper {
    pub fn new(base_url: Url, renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer, base_url }
    }

    fn page_url(&self, number: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("nummer", number)
            .append_pair("actionLu", "Search");
        url
    }
}

/// Enterprise numbers are often written `0403.170.701`.
fn normalize_number(raw: &str) -> String {
    raw.chars().filter(|c| *c != '.' && !c.is_whitespace()).collect()
}

/// Ten digits, separators removed. Old nine-digit numbers get their leading 0.
fn canonical_number(raw: &str) -> String {
    format!("{:0>10}", normalize_number(raw))
}

#[async_trait]
impl SourceFetcher for BeKboScraper {
    fn country(&self) -> CountryCode {
        CountryCode::Be
    }

    fn name(&self) -> &str {
        "kbo-public-search"
    }

    fn max_concurrency(&self) -> usize {
        2
    }

    fn base_latency(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn min_request_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Nine or ten digits once separators are removed.
    fn validate(&self, key: &IdentifierKey) -> FetchResult<()> {
        validate_digits(key, &normalize_number(key.registry_number()), 9..=10)
    }

    fn canonical_key(&self, key: &IdentifierKey) -> IdentifierKey {
        IdentifierKey::new(CountryCode::Be, canonical_number(key.registry_number()))
    }

    async fn fetch(&self, key: &IdentifierKey, timeout: Duration) -> FetchResult<EnrichmentResult> {
        let url = self.page_url(&canonical_number(key.registry_number()));
        debug!(%key, %url, "scraping enterprise page");

        let html = self.renderer.render(&url, timeout).await?;
        parse_enterprise_page(&html, key)
    }
}

/// Extract name and activity from a rendered enterprise page.
pub(crate) fn parse_enterprise_page(html: &str, key: &IdentifierKey) -> FetchResult<EnrichmentResult> {
    let doc = Html::parse_document(html);

    if page_mentions_any(&doc, NOT_FOUND_MARKERS) {
        return Err(FetchError::not_found(key));
    }

    let company_name = extract_name(&doc);
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

/// Value cell of the row labelled `Name:`, first line only.
fn extract_name(doc: &Html) -> Option<String> {
    doc.select(&ROW).find_map(|row| {
        let mut cells = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "td");
        let label = cells.next()?;
        if !label.text().collect::<String>().contains("Name:") {
            return None;
        }
        cells
            .next()?
            .text()
            .map(str::trim)
            .find(|t| !t.is_empty())
            .and_then(clean_company_name)
    })
}

/// NSSO 2025 activity if listed, otherwise VAT 2008.
fn extract_activity(doc: &Html) -> Option<(String, String)> {
    let cells: Vec<String> = doc
        .select(&ACTIVITY_CELL)
        .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
        .collect();

    [&*NSSO_2025, &*VAT_2008].into_iter().find_map(|re| {
        cells.iter().find_map(|text| {
            let caps = re.captures(text)?;
            Some((clean_activity_code(&caps[1])?, clean_description(&caps[2])?))
        })
    })
}
