//! Per-domain validation of fetched batches.
//!
//! Rules live in a [`DomainRules`] table keyed by [`Domain`], built from
//! configuration. Validation never fails a run: rejected points are returned
//! with their reason so the coordinator can log and count them, and a missing
//! point simply leaves a gap the watermark will not cross.

use std::{collections::BTreeMap, collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use grid_ingestor::models::{
    domain::Domain, observation::Observation, resolution::Resolution, window::FetchWindow,
};

/// Expected cadence and accepted value range for one domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainRule {
    pub resolution: Resolution,
    /// Inclusive lower bound for every numeric component.
    pub min: Option<f64>,
    /// Inclusive upper bound for every numeric component.
    pub max: Option<f64>,
}

impl DomainRule {
    pub const fn unbounded(resolution: Resolution) -> Self {
        Self {
            resolution,
            min: None,
            max: None,
        }
    }

    fn in_range(&self, v: f64) -> bool {
        self.min.is_none_or(|min| v >= min) && self.max.is_none_or(|max| v <= max)
    }
}

/// Rule table keyed by domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRules {
    rules: BTreeMap<Domain, DomainRule>,
}

impl Default for DomainRules {
    /// Hourly for both domains; prices unbounded (negative prices are real),
    /// generation never below zero.
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            Domain::DayAheadPrice,
            DomainRule::unbounded(Resolution::HOURLY),
        );
        rules.insert(
            Domain::Generation,
            DomainRule {
                resolution: Resolution::HOURLY,
                min: Some(0.0),
                max: None,
            },
        );
        Self { rules }
    }
}

impl DomainRules {
    pub fn set(&mut self, domain: Domain, rule: DomainRule) {
        self.rules.insert(domain, rule);
    }

    /// Rule for `domain`; the defaults fill any domain the table lacks.
    pub fn get(&self, domain: Domain) -> DomainRule {
        self.rules
            .get(&domain)
            .copied()
            .or_else(|| Self::default().rules.get(&domain).copied())
            .unwrap_or(DomainRule::unbounded(Resolution::HOURLY))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Domain, &DomainRule)> {
        self.rules.iter()
    }
}

/// Why a point was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    OutsideWindow,
    /// A second point for an already seen timestamp in the same batch.
    DuplicateTimestamp,
    /// Timestamp not on a slot boundary of the domain resolution.
    Misaligned,
    /// Payload belongs to another domain than the series.
    WrongDomain,
    NonFinite { component: String },
    OutOfRange { component: String, value: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::OutsideWindow => f.write_str("outside fetch window"),
            Rejection::DuplicateTimestamp => f.write_str("duplicate timestamp"),
            Rejection::Misaligned => f.write_str("not aligned to resolution"),
            Rejection::WrongDomain => f.write_str("payload of another domain"),
            Rejection::NonFinite { component } => write!(f, "{component} is not finite"),
            Rejection::OutOfRange { component, value } => {
                write!(f, "{component}={value} outside configured range")
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Validated {
    pub accepted: Vec<Observation>,
    pub rejected: Vec<(DateTime<Utc>, Rejection)>,
}

/// Validates one batch against `window` and `rule`. The first point for a
/// timestamp decides it: later points with the same timestamp are duplicates
/// even when the first one was rejected. Input order is otherwise preserved.
pub fn validate(window: &FetchWindow, rule: &DomainRule, batch: Vec<Observation>) -> Validated {
    let mut out = Validated::default();
    let mut seen = HashSet::with_capacity(batch.len());

    for obs in batch {
        if !seen.insert(obs.timestamp) {
            out.rejected.push((obs.timestamp, Rejection::DuplicateTimestamp));
            continue;
        }
        match check(window, rule, &obs) {
            Some(reason) => out.rejected.push((obs.timestamp, reason)),
            None => out.accepted.push(obs),
        }
    }
    out
}

fn check(window: &FetchWindow, rule: &DomainRule, obs: &Observation) -> Option<Rejection> {
    if !window.contains(obs.timestamp) {
        return Some(Rejection::OutsideWindow);
    }
    if obs.payload.domain() != window.series.domain {
        return Some(Rejection::WrongDomain);
    }
    if !rule.resolution.is_aligned(obs.timestamp) {
        return Some(Rejection::Misaligned);
    }
    for (component, value) in obs.payload.values() {
        if !value.is_finite() {
            return Some(Rejection::NonFinite {
                component: component.to_string(),
            });
        }
        if !rule.in_range(value) {
            return Some(Rejection::OutOfRange {
                component: component.to_string(),
                value,
            });
        }
    }
    None
}
