//! Country → fetcher lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use vendorlens_shared::{CountryCode, IdentifierKey, Result, SourcesConfig, VendorLensError};

use crate::fetcher::SourceFetcher;
use crate::fetchers::{BeKboScraper, DkCvrScraper, FrApiFetcher};
use crate::http::{HttpRenderer, PageRenderer};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds exactly one fetcher per supported country.
///
/// Immutable once built; share it behind an `Arc` across runs.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    fetchers: BTreeMap<CountryCode, Arc<dyn SourceFetcher>>,
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder::default()
    }

    /// Build the registry with the built-in fetchers for every enabled
    /// source, scraping through a plain HTTP renderer.
    pub fn with_defaults(config: &SourcesConfig) -> Result<Self> {
        Self::with_renderer(config, Arc::new(HttpRenderer::new()?))
    }

    /// Same as [`SourceRegistry::with_defaults`] with a caller-supplied
    /// renderer for the scraping sources.
    pub fn with_renderer(config: &SourcesConfig, renderer: Arc<dyn PageRenderer>) -> Result<Self> {
        let mut builder = Self::builder();

        for country in CountryCode::ALL {
            let source = config.get(country);
            if !source.enabled {
                debug!(%country, "source disabled, not registering");
                continue;
            }
            let base_url = Url::parse(&source.base_url).map_err(|e| {
                VendorLensError::config(format!(
                    "invalid base_url for {country}: {:?} ({e})",
                    source.base_url
                ))
            })?;

            let fetcher: Arc<dyn SourceFetcher> = match country {
                CountryCode::Fr => Arc::new(FrApiFetcher::new(base_url)?),
                CountryCode::Be => Arc::new(BeKboScraper::new(base_url, renderer.clone())),
                CountryCode::Dk => Arc::new(DkCvrScraper::new(base_url, renderer.clone())?),
            };
            builder = builder.register(fetcher)?;
        }

        Ok(builder.build())
    }

    /// Fetcher for `country`, or a configuration error if none is registered.
    pub fn resolve(&self, country: CountryCode) -> Result<Arc<dyn SourceFetcher>> {
        self.fetchers.get(&country).cloned().ok_or_else(|| {
            VendorLensError::config(format!("no fetcher registered for {country}"))
        })
    }

    /// `key` in its source's canonical spelling. Keys with no registered
    /// source or a malformed number come back unchanged.
    pub fn canonical_key(&self, key: &IdentifierKey) -> IdentifierKey {
        match self.fetchers.get(&key.country()) {
            Some(fetcher) if fetcher.validate(key).is_ok() => fetcher.canonical_key(key),
            _ => key.clone(),
        }
    }

    pub fn countries(&self) -> impl Iterator<Item = CountryCode> + '_ {
        self.fetchers.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceFetcher>> {
        self.fetchers.values()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

/// Collects fetchers before the registry is frozen.
#[derive(Default)]
pub struct SourceRegistryBuilder {
    fetchers: BTreeMap<CountryCode, Arc<dyn SourceFetcher>>,
}

impl SourceRegistryBuilder {
    /// Register `fetcher` under its own country. A second fetcher for the
    /// same country is a configuration error.
    pub fn register(mut self, fetcher: Arc<dyn SourceFetcher>) -> Result<Self> {
        let country = fetcher.country();
        if let Some(existing) = self.fetchers.get(&country) {
            return Err(VendorLensError::config(format!(
                "duplicate fetcher for {country}: {} already registered, got {}",
                existing.name(),
                fetcher.name()
            )));
        }
        debug!(%country, fetcher = fetcher.name(), "registered fetcher");
        self.fetchers.insert(country, fetcher);
        Ok(self)
    }

    pub fn build(self) -> SourceRegistry {
        SourceRegistry {
            fetchers: self.fetchers,
        }
    }
}
