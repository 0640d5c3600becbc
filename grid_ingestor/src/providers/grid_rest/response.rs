use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{
    domain::Domain,
    observation::{Observation, Payload, fuel},
    series::SeriesKey,
};

/// Generation figure: a single aggregate or a per-fuel breakdown.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MwValue {
    Total(f64),
    ByFuel(BTreeMap<String, f64>),
}

#[derive(Deserialize, Debug)]
pub struct GridPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub mw: Option<MwValue>,
}

#[derive(Deserialize, Debug)]
pub struct GridResponse {
    #[serde(default)]
    pub points: Vec<GridPoint>,
    pub next_page_token: Option<String>,
}

impl GridPoint {
    /// Maps the wire point onto the canonical payload for `series`' domain.
    /// A point missing the field its domain needs is a malformed payload.
    pub fn into_observation(self, series: &SeriesKey) -> Result<Observation, String> {
        let payload = match series.domain {
            Domain::DayAheadPrice => Payload::DayAheadPrice {
                price: self
                    .price
                    .ok_or_else(|| format!("price point at {} has no `price`", self.timestamp))?,
            },
            Domain::Generation => {
                let mw = match self.mw {
                    Some(MwValue::Total(v)) => BTreeMap::from([(fuel::TOTAL.to_string(), v)]),
                    Some(MwValue::ByFuel(map)) => map,
                    None => {
                        return Err(format!(
                            "generation point at {} has no `mw`",
                            self.timestamp
                        ));
                    }
                };
                Payload::Generation { mw }
            }
        };
        Ok(Observation {
            series: series.clone(),
            timestamp: self.timestamp,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_page_parses_with_next_token() {
        let raw = r#"{
            "points": [
                {"timestamp": "2024-01-01T00:00:00Z", "price": 41.5},
                {"timestamp": "2024-01-01T01:00:00Z", "price": -3.2}
            ],
            "next_page_token": "p2"
        }"#;
        let page: GridResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(page.points.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));

        let key = SeriesKey::new(Domain::DayAheadPrice, "NL").unwrap();
        let obs = page.points.into_iter().nth(1).unwrap().into_observation(&key).unwrap();
        assert_eq!(obs.payload, Payload::DayAheadPrice { price: -3.2 });
    }

    #[test]
    fn generation_accepts_total_or_breakdown() {
        let key = SeriesKey::new(Domain::Generation, "NL").unwrap();
        let raw = r#"{"points": [
            {"timestamp": "2024-06-01T12:00:00Z", "mw": 5120.0},
            {"timestamp": "2024-06-01T13:00:00Z", "mw": {"B16": 6000.0, "B19": 1500.5}}
        ]}"#;
        let page: GridResponse = serde_json::from_str(raw).unwrap();
        assert!(page.next_page_token.is_none());
        let obs: Vec<_> = page
            .points
            .into_iter()
            .map(|p| p.into_observation(&key).unwrap())
            .collect();
        assert_eq!(obs[0].payload.values(), vec![(fuel::TOTAL, 5120.0)]);
        assert_eq!(obs[1].payload.values().len(), 2);
    }

    #[test]
    fn missing_domain_field_is_malformed() {
        let key = SeriesKey::new(Domain::DayAheadPrice, "NL").unwrap();
        let point: GridPoint =
            serde_json::from_str(r#"{"timestamp": "2024-01-01T00:00:00Z", "mw": 3.0}"#).unwrap();
        assert!(point.into_observation(&key).is_err());
    }
}
