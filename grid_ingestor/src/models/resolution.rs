//! Expected cadence of a series, used to reason about gaps.
//!
//! A [`Resolution`] pairs a non-zero amount with a fixed-width unit. Slot math
//! is plain second arithmetic from the Unix epoch, so slot ids are stable and
//! can be stored in bitmaps.
//!
//! ```
//! use grid_ingestor::models::resolution::{Resolution, ResolutionUnit};
//!
//! let r: Resolution = "15m".parse().unwrap();
//! assert_eq!(r.unit(), ResolutionUnit::Minute);
//! assert_eq!(r.to_string(), "15m");
//! ```

use std::{fmt, num::NonZeroU32, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionUnit {
    Minute,
    Hour,
    Day,
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("empty resolution")]
    Empty,
    #[error("resolution amount must be a positive integer: {0:?}")]
    Amount(String),
    #[error("unknown resolution unit {0:?} (use m, h or D)")]
    Unit(String),
}

/// amount × unit, e.g. 15-Minute or 1-Hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    amount: NonZeroU32,
    unit: ResolutionUnit,
}

impl Resolution {
    pub const HOURLY: Resolution = Resolution {
        amount: NonZeroU32::MIN,
        unit: ResolutionUnit::Hour,
    };

    pub const fn new(amount: NonZeroU32, unit: ResolutionUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn amount(&self) -> NonZeroU32 {
        self.amount
    }

    pub const fn unit(&self) -> ResolutionUnit {
        self.unit
    }

    /// Width of one slot in seconds.
    pub fn width_secs(&self) -> i64 {
        let unit = match self.unit {
            ResolutionUnit::Minute => SECS_PER_MINUTE,
            ResolutionUnit::Hour => SECS_PER_HOUR,
            ResolutionUnit::Day => SECS_PER_DAY,
        };
        unit * self.amount.get() as i64
    }

    pub fn width(&self) -> Duration {
        Duration::seconds(self.width_secs())
    }

    /// Slot id containing `ts`. Timestamps before the epoch map to negative ids.
    pub fn slot_id(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.width_secs())
    }

    pub fn slot_start(&self, id: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(id * self.width_secs())
    }

    /// True when `ts` sits exactly on a slot boundary.
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp().rem_euclid(self.width_secs()) == 0 && ts.timestamp_subsec_nanos() == 0
    }

    /// First slot start `>= ts`.
    pub fn align_up(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_aligned(ts) {
            ts
        } else {
            self.slot_start(self.slot_id(ts) + 1)
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = match self.unit {
            ResolutionUnit::Minute => "m",
            ResolutionUnit::Hour => "h",
            ResolutionUnit::Day => "D",
        };
        write!(f, "{}{u}", self.amount.get())
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ResolutionError::Empty);
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ResolutionError::Unit(String::new()))?;
        let (digits, unit) = s.split_at(split);
        let amount = digits
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| ResolutionError::Amount(digits.to_string()))?;
        let unit = match unit {
            "m" | "min" => ResolutionUnit::Minute,
            "h" | "H" => ResolutionUnit::Hour,
            "D" | "d" => ResolutionUnit::Day,
            other => return Err(ResolutionError::Unit(other.to_string())),
        };
        Ok(Resolution::new(amount, unit))
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> Self {
        r.to_string()
    }
}
