//! Canonical in-memory representation of one time-indexed data point.
//!
//! Every [`SeriesFetcher`](crate::providers::SeriesFetcher) returns these,
//! whatever the upstream document looked like.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{domain::Domain, series::SeriesKey};

/// ENTSO-E production type codes used as generation payload keys.
pub mod fuel {
    pub const FOSSIL_GAS: &str = "B04";
    pub const FOSSIL_HARD_COAL: &str = "B05";
    pub const NUCLEAR: &str = "B14";
    pub const SOLAR: &str = "B16";
    pub const WIND_OFFSHORE: &str = "B18";
    pub const WIND_ONSHORE: &str = "B19";
    /// Key used when the upstream only reports one aggregate figure.
    pub const TOTAL: &str = "total";
}

/// Domain-specific numeric payload.
///
/// Serialized with an internal `kind` tag. `BTreeMap` keeps the generation
/// breakdown in a stable order so two equal payloads always serialize to the
/// same bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Clearing price in currency per MWh. Negative prices are legitimate.
    DayAheadPrice { price: f64 },
    /// Generation in MW keyed by production type code.
    Generation { mw: BTreeMap<String, f64> },
}

impl Payload {
    pub fn domain(&self) -> Domain {
        match self {
            Payload::DayAheadPrice { .. } => Domain::DayAheadPrice,
            Payload::Generation { .. } => Domain::Generation,
        }
    }

    /// All numeric components as `(name, value)` pairs, for range checks.
    pub fn values(&self) -> Vec<(&str, f64)> {
        match self {
            Payload::DayAheadPrice { price } => vec![("price", *price)],
            Payload::Generation { mw } => mw.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
        }
    }

    /// Stable JSON encoding used for storage and identical-payload checks.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One data point of a series.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub series: SeriesKey,
    /// Start of the interval the value describes (UTC).
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl Observation {
    pub fn price(series: SeriesKey, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            series,
            timestamp,
            payload: Payload::DayAheadPrice { price },
        }
    }

    pub fn generation<I, K>(series: SeriesKey, timestamp: DateTime<Utc>, mw: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            series,
            timestamp,
            payload: Payload::Generation {
                mw: mw.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn canonical_json_is_order_independent_for_generation() {
        let key = SeriesKey::new(Domain::Generation, "NL").unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let a = Observation::generation(key.clone(), ts, [(fuel::SOLAR, 5000.0), (fuel::NUCLEAR, 480.0)]);
        let b = Observation::generation(key, ts, [(fuel::NUCLEAR, 480.0), (fuel::SOLAR, 5000.0)]);
        assert_eq!(
            a.payload.to_canonical_json().unwrap(),
            b.payload.to_canonical_json().unwrap()
        );
        assert_eq!(a.payload.values().len(), 2);
    }

    #[test]
    fn price_payload_keeps_negative_values() {
        let p = Payload::DayAheadPrice { price: -200.0 };
        let raw = p.to_canonical_json().unwrap();
        assert_eq!(raw, r#"{"kind":"day_ahead_price","price":-200.0}"#);
        assert_eq!(Payload::from_json(&raw).unwrap(), p);
        assert_eq!(p.domain(), Domain::DayAheadPrice);
    }
}
