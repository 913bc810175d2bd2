//! Core domain types for company enrichment.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, VendorLensError};

// ---------------------------------------------------------------------------
// CountryCode
// ---------------------------------------------------------------------------

/// Jurisdictions with a registered data source.
///
/// Closed on purpose: adding a country means adding a fetcher and a registry
/// entry, never accepting an arbitrary string at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CountryCode {
    Fr,
    Be,
    Dk,
}

impl CountryCode {
    /// Every supported country, in registry order.
    pub const ALL: [CountryCode; 3] = [CountryCode::Fr, CountryCode::Be, CountryCode::Dk];

    /// Two-letter ISO code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fr => "FR",
            Self::Be => "BE",
            Self::Dk => "DK",
        }
    }

    /// Human-readable country name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Fr => "France",
            Self::Be => "Belgium",
            Self::Dk => "Denmark",
        }
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountryCode {
    type Err = VendorLensError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FR" => Ok(Self::Fr),
            "BE" => Ok(Self::Be),
            "DK" => Ok(Self::Dk),
            _ => Err(VendorLensError::UnsupportedCountry(s.trim().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentifierKey
// ---------------------------------------------------------------------------

/// A (country, registry number) pair: the dataset's primary key and the
/// orchestrator's unit of dispatch.
///
/// The registry number is only trimmed here; its format is validated by the
/// source that owns the country.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentifierKey {
    country: CountryCode,
    registry_number: String,
}

impl IdentifierKey {
    pub fn new(country: CountryCode, registry_number: impl AsRef<str>) -> Self {
        Self {
            country,
            registry_number: registry_number.as_ref().trim().to_string(),
        }
    }

    pub fn country(&self) -> CountryCode {
        self.country
    }

    pub fn registry_number(&self) -> &str {
        &self.registry_number
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.country, self.registry_number)
    }
}

impl FromStr for IdentifierKey {
    type Err = VendorLensError;

    /// Parse `CC:number` or `CC,number`.
    fn from_str(s: &str) -> Result<Self> {
        let (country, number) = s
            .split_once([':', ','])
            .ok_or_else(|| VendorLensError::parse(format!("expected CC:number, got {s:?}")))?;

        let number = number.trim();
        if number.is_empty() {
            return Err(VendorLensError::parse(format!(
                "missing registry number in {s:?}"
            )));
        }

        Ok(Self::new(country.parse()?, number))
    }
}

// ---------------------------------------------------------------------------
// EnrichmentResult
// ---------------------------------------------------------------------------

/// A complete record returned by a source for exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub company_name: String,
    pub activity_code: String,
    pub activity_description: String,
    /// When the source produced this record.
    pub source_timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DatasetRow
// ---------------------------------------------------------------------------

/// Classification levels owned by the external classification process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub l1: Option<String>,
    #[serde(default)]
    pub l2: Option<String>,
    #[serde(default)]
    pub l3: Option<String>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        [&self.l1, &self.l2, &self.l3]
            .iter()
            .all(|v| v.as_deref().is_none_or(str::is_empty))
    }
}

/// One row of the vendor dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub key: IdentifierKey,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub activity_code: Option<String>,
    #[serde(default)]
    pub activity_description: Option<String>,
    /// Protected: never written by the enrichment path.
    #[serde(default)]
    pub classification: Classification,
}

impl DatasetRow {
    /// A fresh row built from a fetch result, with empty classification.
    pub fn from_enrichment(key: IdentifierKey, result: &EnrichmentResult) -> Self {
        Self {
            key,
            company_name: Some(result.company_name.clone()),
            activity_code: Some(result.activity_code.clone()),
            activity_description: Some(result.activity_description.clone()),
            classification: Classification::default(),
        }
    }

    /// Copy of this row with only the enrichable columns replaced.
    pub fn enriched_with(&self, result: &EnrichmentResult) -> Self {
        Self {
            key: self.key.clone(),
            company_name: Some(result.company_name.clone()),
            activity_code: Some(result.activity_code.clone()),
            activity_description: Some(result.activity_description.clone()),
            classification: self.classification.clone(),
        }
    }

    /// Content fingerprint over every column.
    pub fn fingerprint(&self) -> RowFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.key.to_string().as_bytes());
        for field in [
            &self.company_name,
            &self.activity_code,
            &self.activity_description,
            &self.classification.l1,
            &self.classification.l2,
            &self.classification.l3,
        ] {
            hasher.update([0x1f]);
            match field {
                Some(v) => {
                    hasher.update([1]);
                    hasher.update(v.as_bytes());
                }
                None => hasher.update([0]),
            }
        }
        RowFingerprint(format!("{:x}", hasher.finalize()))
    }
}

/// SHA-256 of a row's full content, hex encoded.
///
/// Used as the compare-and-swap token between snapshot and merge, so a store
/// does not need a revision column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowFingerprint(pub String);

impl fmt::Display for RowFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
