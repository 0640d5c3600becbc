use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of data a series carries. Each domain has its own upstream endpoint,
/// payload shape and validation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Day-ahead market clearing price per MWh.
    DayAheadPrice,
    /// Actual generation in MW, broken down per fuel type.
    Generation,
}

#[derive(Debug, Error)]
#[error("unknown domain: {0:?} (expected day_ahead_price or generation)")]
pub struct UnknownDomain(pub String);

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::DayAheadPrice, Domain::Generation];

    /// Stable storage code, identical to the serde representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Domain::DayAheadPrice => "day_ahead_price",
            Domain::Generation => "generation",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day_ahead_price" | "price" | "prices" => Ok(Domain::DayAheadPrice),
            "generation" => Ok(Domain::Generation),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}
