use std::{num::NonZeroU32, time::Duration};

use serde::{Deserialize, Serialize};

use crate::models::{domain::Domain, series::SeriesKey, window::SubRange};

fn default_token_env() -> String {
    "GRID_API_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Connection settings for [`GridRestProvider`](super::GridRestProvider).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridRestConfig {
    /// Base url; domain paths are appended to it.
    pub base_url: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Page size forwarded to upstream; upstream default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Client-side request quota; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<NonZeroU32>,
}

impl GridRestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_env: default_token_env(),
            page_size: None,
            request_timeout_secs: default_timeout_secs(),
            requests_per_minute: None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Path segment serving a domain.
pub fn endpoint_path(domain: Domain) -> &'static str {
    match domain {
        Domain::DayAheadPrice => "day-ahead-prices",
        Domain::Generation => "generation",
    }
}

/// Full url for a domain, tolerating a trailing slash on the base.
pub fn endpoint_url(base_url: &str, domain: Domain) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), endpoint_path(domain))
}

/// Query string for one page of one sub-range.
pub fn construct_params(
    series: &SeriesKey,
    range: SubRange,
    page_size: Option<u32>,
    page_token: Option<&str>,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("region".to_string(), series.region.clone()),
        ("start".to_string(), range.start.to_rfc3339()),
        ("end".to_string(), range.end.to_rfc3339()),
    ];
    if let Some(size) = page_size {
        params.push(("page_size".to_string(), size.to_string()));
    }
    if let Some(token) = page_token {
        params.push(("page_token".to_string(), token.to_string()));
    }
    params
}
