use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::get_env_var;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::{
    models::{observation::Observation, series::SeriesKey, window::SubRange},
    providers::{
        ApiSnafu, AuthSnafu, ClientBuildSnafu, CredentialsSnafu, FetchError, InvalidBaseUrlSnafu,
        InvalidTokenSnafu, ProviderInitError, RateLimitedSnafu, ReqwestSnafu, SeriesFetcher,
        UpstreamSnafu,
        grid_rest::{
            params::{GridRestConfig, construct_params, endpoint_url},
            response::GridResponse,
        },
    },
};

pub struct GridRestProvider {
    client: Client,
    base_url: String,
    page_size: Option<u32>,
    limiter: Option<DefaultDirectRateLimiter>,
    _token: SecretString,
}

impl GridRestProvider {
    /// Creates a provider reading the API token from the environment variable
    /// named by `config.token_env`.
    pub fn new(config: &GridRestConfig) -> Result<Self, ProviderInitError> {
        let token = get_env_var(&config.token_env).context(CredentialsSnafu)?;
        Self::with_token(config, SecretString::from(token))
    }

    pub fn with_token(
        config: &GridRestConfig,
        token: SecretString,
    ) -> Result<Self, ProviderInitError> {
        let base_url = config.base_url.trim().to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return InvalidBaseUrlSnafu {
                url: base_url,
                message: "expected an http(s) url",
            }
            .fail();
        }

        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .context(InvalidTokenSnafu)?;
        auth.set_sensitive(true);
        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .context(ClientBuildSnafu)?;

        let limiter = config
            .requests_per_minute
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url,
            page_size: config.page_size,
            limiter,
            _token: token,
        })
    }
}

/// Reads a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps a non-success HTTP status onto the fetch error taxonomy.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> FetchError {
    let message = format!("{status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthSnafu { message }.build(),
        StatusCode::TOO_MANY_REQUESTS => RateLimitedSnafu { retry_after }.build(),
        s if s.is_server_error() => UpstreamSnafu { message }.build(),
        _ => ApiSnafu { message }.build(),
    }
}

#[async_trait]
impl SeriesFetcher for GridRestProvider {
    async fn fetch_range(
        &self,
        series: &SeriesKey,
        range: SubRange,
    ) -> Result<Vec<Observation>, FetchError> {
        let url = endpoint_url(&self.base_url, series.domain);
        let mut observations = Vec::new();
        let mut next_page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let query_params =
                construct_params(series, range, self.page_size, next_page_token.as_deref());
            let response = self
                .client
                .get(&url)
                .query(&query_params)
                .send()
                .await
                .context(ReqwestSnafu)?;

            let status = response.status();
            if !status.is_success() {
                let retry_after = parse_retry_after(response.headers());
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown API error".to_string());
                warn!(%series, %range, %status, "upstream request failed");
                return Err(classify_status(status, retry_after, body));
            }

            let text = response.text().await.context(ReqwestSnafu)?;
            let page: GridResponse = serde_json::from_str(&text).map_err(|e| {
                UpstreamSnafu {
                    message: format!("malformed response body: {e}"),
                }
                .build()
            })?;
            pages += 1;

            for point in page.points {
                let obs = point
                    .into_observation(series)
                    .map_err(|message| UpstreamSnafu { message }.build())?;
                observations.push(obs);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => {
                    if next_page_token.as_deref() == Some(token.as_str()) {
                        return UpstreamSnafu {
                            message: format!("pagination stuck on token {token:?}"),
                        }
                        .fail();
                    }
                    next_page_token = Some(token);
                }
                _ => break,
            }
        }

        debug!(%series, %range, pages, points = observations.len(), "fetched sub-range");
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FetchErrorKind;

    #[test]
    fn statuses_map_to_error_kinds() {
        let cases = [
            (StatusCode::UNAUTHORIZED, FetchErrorKind::Auth),
            (StatusCode::FORBIDDEN, FetchErrorKind::Auth),
            (StatusCode::TOO_MANY_REQUESTS, FetchErrorKind::RateLimited),
            (StatusCode::BAD_GATEWAY, FetchErrorKind::Retryable),
            (StatusCode::SERVICE_UNAVAILABLE, FetchErrorKind::Retryable),
            (StatusCode::BAD_REQUEST, FetchErrorKind::Permanent),
            (StatusCode::NOT_FOUND, FetchErrorKind::Permanent),
        ];
        for (status, kind) in cases {
            assert_eq!(classify_status(status, None, String::new()).kind(), kind, "{status}");
        }
    }

    #[test]
    fn rate_limit_keeps_retry_after_hint() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::RETRY_AFTER, header::HeaderValue::from_static("12"));
        let hint = parse_retry_after(&headers);
        assert_eq!(hint, Some(Duration::from_secs(12)));

        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, hint, String::new());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn http_date_retry_after_is_ignored() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::RETRY_AFTER,
            header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn rejects_non_http_base_url() {
        let cfg = GridRestConfig::new("ftp://grid.example");
        let err = GridRestProvider::with_token(&cfg, SecretString::from("t".to_string()));
        assert!(matches!(err, Err(ProviderInitError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn builds_with_rate_limit() {
        let mut cfg = GridRestConfig::new("https://grid.example/api");
        cfg.requests_per_minute = std::num::NonZeroU32::new(30);
        let provider =
            GridRestProvider::with_token(&cfg, SecretString::from("token".to_string())).unwrap();
        assert!(provider.limiter.is_some());
    }
}
