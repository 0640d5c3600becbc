//! Series identity: one `(domain, region)` pair tracked independently.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::domain::{Domain, UnknownDomain};

/// Identifies one ingestible series. Used as the storage namespace and as the
/// watermark key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub domain: Domain,
    /// Bidding-zone / area code, normalized to uppercase (e.g. `NL`).
    pub region: String,
}

#[derive(Debug, Error)]
pub enum SeriesKeyError {
    #[error("series key must look like `domain/REGION`, got {0:?}")]
    Malformed(String),
    #[error("region cannot be empty")]
    EmptyRegion,
    #[error(transparent)]
    Domain(#[from] UnknownDomain),
}

impl SeriesKey {
    /// Builds a key, trimming and uppercasing the region.
    pub fn new(domain: Domain, region: impl AsRef<str>) -> Result<Self, SeriesKeyError> {
        let region = normalize_region(region.as_ref());
        if region.is_empty() {
            return Err(SeriesKeyError::EmptyRegion);
        }
        Ok(Self { domain, region })
    }
}

/// Trim + uppercase; region codes are case-insensitive upstream.
pub fn normalize_region(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.region)
    }
}

impl FromStr for SeriesKey {
    type Err = SeriesKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, region) = s
            .split_once('/')
            .ok_or_else(|| SeriesKeyError::Malformed(s.to_string()))?;
        SeriesKey::new(domain.parse()?, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_region() {
        let key: SeriesKey = " generation/ nl ".parse().unwrap();
        assert_eq!(key.domain, Domain::Generation);
        assert_eq!(key.region, "NL");
        assert_eq!(key.to_string(), "generation/NL");
    }

    #[test]
    fn rejects_missing_separator_and_empty_region() {
        assert!(matches!(
            "generation".parse::<SeriesKey>(),
            Err(SeriesKeyError::Malformed(_))
        ));
        assert!(matches!(
            "generation/  ".parse::<SeriesKey>(),
            Err(SeriesKeyError::EmptyRegion)
        ));
    }
}
