//! Built-in fetchers, one per supported country.

mod be_kbo;
mod dk_cvr;
mod fr_api;

use scraper::Html;
use vendorlens_shared::{FetchError, IdentifierKey};

use crate::fetcher::FetchResult;

pub use be_kbo::BeKboScraper;
pub use dk_cvr::DkCvrScraper;
pub use fr_api::FrApiFetcher;

/// Whether the document's visible text contains any of `markers`.
fn page_mentions_any(doc: &Html, markers: &[&str]) -> bool {
    let text = doc.root_element().text().collect::<String>();
    markers.iter().any(|m| text.contains(m))
}

/// A scraped page that rendered but lacks a field is treated as not yet
/// loaded, not as a definitive answer.
fn require_fields<A, B>(key: &IdentifierKey, a: Option<A>, b: Option<B>) -> FetchResult<(A, B)> {
    match (a, b) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, _) => Err(FetchError::soft(format!("company name missing for {key}"))),
        (_, None) => Err(FetchError::soft(format!("activity missing for {key}"))),
    }
}
