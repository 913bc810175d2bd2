//! Country-specific company sources.
//!
//! This crate provides:
//! - [`SourceFetcher`]: the capability every source implements
//! - [`SourceRegistry`]: one fetcher per country, built from config
//! - [`fetchers`]: the built-in French API fetcher and the Belgian and Danish scrapers
//! - [`PageRenderer`]: the seam scrapers use to obtain page HTML

pub mod fetcher;
pub mod fetchers;
pub mod http;
pub mod normalize;
pub mod registry;

pub use fetcher::{FetchResult, SourceFetcher, validate_digits};
pub use fetchers::{BeKboScraper, DkCvrScraper, FrApiFetcher};
pub use http::{HttpRenderer, PageRenderer, build_client};
pub use registry::{SourceRegistry, SourceRegistryBuilder};
