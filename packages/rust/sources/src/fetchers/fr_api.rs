//! France: the public company search API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use vendorlens_shared::{CountryCode, EnrichmentResult, FetchError, IdentifierKey, Result};

use crate::fetcher::{FetchResult, SourceFetcher, validate_digits};
use crate::http::{build_client, classify_status, classify_transport};
use crate::normalize::{clean_activity_code, clean_company_name, clean_description};

/// Fetches French companies by SIREN from a JSON search endpoint.
pub struct FrApiFetcher {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    siren: Option<String>,
    #[serde(default)]
    nom_complet: Option<String>,
    #[serde(default)]
    activite_principale: Option<String>,
    #[serde(default)]
    libelle_activite_principale: Option<String>,
}

impl FrApiFetcher {
    pub fn new(base_url: Url) -> Result<Self> {
        Ok(Self::with_client(build_client()?, base_url))
    }

    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn to_result(key: &IdentifierKey, body: SearchResponse) -> FetchResult<EnrichmentResult> {
        let mut hits = body.results;
        if hits.is_empty() {
            return Err(FetchError::not_found(key));
        }
        // Full-text search: prefer the exact SIREN, fall back to the top hit.
        let position = hits
            .iter()
            .position(|h| h.siren.as_deref() == Some(key.registry_number()))
            .unwrap_or(0);
        let hit = hits.swap_remove(position);

        let company_name = hit.nom_complet.as_deref().and_then(clean_company_name);
        let activity_code = hit.activite_principale.as_deref().and_then(clean_activity_code);
        let activity_description = hit
            .libelle_activite_principale
            .as_deref()
            .and_then(clean_description);

        match (company_name, activity_code, activity_description) {
            (Some(company_name), Some(activity_code), Some(activity_description)) => {
                Ok(EnrichmentResult {
                    company_name,
                    activity_code,
                    activity_description,
                    source_timestamp: Utc::now(),
                })
            }
            _ => Err(FetchError::soft(format!("incomplete record for {key}"))),
        }
    }
}

#[async_trait]
impl SourceFetcher for FrApiFetcher {
    fn country(&self) -> CountryCode {
        CountryCode::Fr
    }

    fn name(&self) -> &str {
        "recherche-entreprises"
    }

    fn max_concurrency(&self) -> usize {
        8
    }

    fn base_latency(&self) -> Duration {
        Duration::from_millis(300)
    }

    /// SIREN: exactly nine digits.
    fn validate(&self, key: &IdentifierKey) -> FetchResult<()> {
        validate_digits(key, key.registry_number(), 9..=9)
    }

    async fn fetch(&self, key: &IdentifierKey, timeout: Duration) -> FetchResult<EnrichmentResult> {
        let url = &self.base_url;
        debug!(%key, %url, "querying company API");

        let response = self
            .client
            .get(url.as_str())
            .query(&[("q", key.registry_number())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport(&e, url))?;

        if let Some(err) = classify_status(response.status(), url) {
            return Err(err);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| FetchError::soft(format!("malformed response for {key}: {e}")))?;

        Self::to_result(key, body)
    }
}
