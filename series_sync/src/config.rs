//! Sync configuration: parsing, normalization, and loading.
//!
//! A TOML file describes:
//! - where the database lives and which market time zone bounds the fetch horizon
//! - how far back a series' very first run reaches and how windows are chunked
//! - the retry budget for upstream calls
//! - the upstream provider (base url, token variable, quota)
//! - the series to ingest and the per-domain validation rule table
//!
//! ```toml
//! database_url = "data/grid.db"
//! market_timezone = "Europe/Amsterdam"
//!
//! [provider]
//! base_url = "https://grid.example/api/v1"
//!
//! [[series]]
//! domain = "day_ahead_price"
//! region = "nl"
//!
//! [domains.generation]
//! resolution = "1h"
//! min = 0.0
//! ```
//!
//! Key behaviors:
//! - Normalization uppercases and trims regions, de-duplicates series while
//!   preserving order, canonicalizes domain keys of the rule table and checks
//!   rule ranges.
//! - Entrypoints: [`load_config_str`] and [`load_config_path`].

use std::{collections::HashSet, mem, path::Path, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use grid_ingestor::{
    models::{
        domain::{Domain, UnknownDomain},
        resolution::Resolution,
        series::{SeriesKey, SeriesKeyError},
    },
    providers::grid_rest::GridRestConfig,
    requests::chunked::DEFAULT_CHUNK_MONTHS,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    coordinator::retry::RetryPolicy,
    tz,
    validation::{DomainRule, DomainRules},
};

fn default_timezone() -> String {
    tz::DEFAULT_MARKET_TZ.to_string()
}

fn default_lookback_years() -> u32 {
    3
}

fn default_lock_stale_after_secs() -> u64 {
    3_600
}

fn default_chunk_months() -> u32 {
    DEFAULT_CHUNK_MONTHS
}

/// Top-level sync configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// SQLite path or `sqlite:` url. `DATABASE_URL` overrides it at the CLI.
    pub database_url: String,
    /// IANA zone whose midnight ends every default fetch window.
    #[serde(default = "default_timezone")]
    pub market_timezone: String,
    /// How far before the horizon a series without watermark starts.
    #[serde(default = "default_lookback_years")]
    pub initial_lookback_years: u32,
    /// Sub-range size for upstream requests, in calendar months.
    #[serde(default = "default_chunk_months")]
    pub chunk_months: u32,
    /// Age after which a run lease left by a crashed process may be taken over.
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
    #[serde(default)]
    pub retry: RetryCfg,
    pub provider: GridRestConfig,
    #[serde(default)]
    pub series: Vec<SeriesCfg>,
    /// Validation rule table keyed by domain code.
    #[serde(default)]
    pub domains: IndexMap<String, DomainRuleCfg>,
}

/// Retry budget for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryCfg {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

/// One series to ingest.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SeriesCfg {
    pub domain: Domain,
    pub region: String,
    /// Inclusive start of the very first run; defaults to the lookback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
}

/// Validation rule for one domain; missing fields keep the built-in default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DomainRuleCfg {
    pub resolution: Option<Resolution>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("database_url cannot be empty")]
    EmptyDatabaseUrl,
    #[error(transparent)]
    Timezone(#[from] tz::TzError),
    #[error("chunk_months must be at least 1")]
    ZeroChunkMonths,
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("lock_stale_after_secs must be at least 1")]
    ZeroLockStaleAfter,
    #[error("invalid series {index}: {source}")]
    Series {
        index: usize,
        source: SeriesKeyError,
    },
    #[error("unknown domain in rule table: {0}")]
    UnknownDomain(#[from] UnknownDomain),
    #[error("duplicate rule for domain {0} after normalization")]
    DuplicateDomainRule(Domain),
    #[error("rule for {domain}: min {min} is greater than max {max}")]
    InvertedRange { domain: Domain, min: f64, max: f64 },
    #[error("rule for {domain}: bounds must be finite")]
    NonFiniteBound { domain: Domain },
}

/// Summary of changes performed during normalization.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    /// Regions whose spelling changed when trimming/uppercasing.
    pub regions_normalized: usize,
    /// Series entries dropped as duplicates of an earlier entry.
    pub series_deduped: usize,
    /// Rule table keys rewritten to their canonical domain code.
    pub domain_keys_renamed: usize,
}

/// Normalize a config in place.
///
/// Errors:
/// - empty database url, unknown time zone
/// - zero chunk size, attempt budget or lock stale limit
/// - a series region that is empty after trimming
/// - unknown or duplicate (after canonicalization) rule table domains
/// - a rule whose `min` exceeds its `max`
pub fn normalize_config(cfg: &mut SyncConfig) -> Result<NormalizationReport, ConfigError> {
    let mut report = NormalizationReport::default();

    cfg.database_url = cfg.database_url.trim().to_string();
    if cfg.database_url.is_empty() {
        return Err(ConfigError::EmptyDatabaseUrl);
    }
    tz::parse_tz(&cfg.market_timezone)?;
    cfg.market_timezone = cfg.market_timezone.trim().to_string();
    if cfg.chunk_months == 0 {
        return Err(ConfigError::ZeroChunkMonths);
    }
    if cfg.retry.max_attempts == 0 {
        return Err(ConfigError::ZeroAttempts);
    }
    if cfg.lock_stale_after_secs == 0 {
        return Err(ConfigError::ZeroLockStaleAfter);
    }

    // --- series (normalize region, dedupe, preserve order)
    let mut seen = HashSet::new();
    let mut series = Vec::with_capacity(cfg.series.len());
    for (index, mut s) in mem::take(&mut cfg.series).into_iter().enumerate() {
        let key = SeriesKey::new(s.domain, &s.region)
            .map_err(|source| ConfigError::Series { index, source })?;
        if key.region != s.region {
            report.regions_normalized += 1;
            s.region = key.region.clone();
        }
        if seen.insert(key) {
            series.push(s);
        } else {
            report.series_deduped += 1;
        }
    }
    cfg.series = series;

    // --- rule table (canonical domain keys, sane bounds)
    let mut rebuilt = IndexMap::new();
    for (raw, rule) in mem::take(&mut cfg.domains) {
        let domain: Domain = raw.parse()?;
        if domain.as_str() != raw {
            report.domain_keys_renamed += 1;
        }
        if rebuilt.contains_key(domain.as_str()) {
            return Err(ConfigError::DuplicateDomainRule(domain));
        }
        if rule.min.is_some_and(|v| !v.is_finite()) || rule.max.is_some_and(|v| !v.is_finite()) {
            return Err(ConfigError::NonFiniteBound { domain });
        }
        if let (Some(min), Some(max)) = (rule.min, rule.max) {
            if min > max {
                return Err(ConfigError::InvertedRange { domain, min, max });
            }
        }
        rebuilt.insert(domain.as_str().to_string(), rule);
    }
    cfg.domains = rebuilt;

    Ok(report)
}

impl SyncConfig {
    /// Parsed market zone. Only valid after [`normalize_config`].
    pub fn timezone(&self) -> Result<Tz, tz::TzError> {
        tz::parse_tz(&self.market_timezone)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    pub fn series_keys(&self) -> Result<Vec<SeriesKey>, SeriesKeyError> {
        self.series
            .iter()
            .map(|s| SeriesKey::new(s.domain, &s.region))
            .collect()
    }

    /// Built-in rules overlaid with the configured ones.
    pub fn rules(&self) -> Result<DomainRules, UnknownDomain> {
        let mut rules = DomainRules::default();
        for (raw, cfg) in &self.domains {
            let domain: Domain = raw.parse()?;
            let base = rules.get(domain);
            rules.set(
                domain,
                DomainRule {
                    resolution: cfg.resolution.unwrap_or(base.resolution),
                    min: cfg.min.or(base.min),
                    max: cfg.max.or(base.max),
                },
            );
        }
        Ok(rules)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

/// Parse and normalize a config from a TOML string.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<(SyncConfig, NormalizationReport)> {
    let mut cfg: SyncConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
    let report = normalize_config(&mut cfg).context("invalid config")?;
    Ok((cfg, report))
}

/// Read a config TOML file from disk, parse, and normalize it.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<(SyncConfig, NormalizationReport)> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    load_config_str(&s).with_context(|| format!("failed to load config {}", path.display()))
}
