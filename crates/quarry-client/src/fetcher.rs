use std::collections::BTreeMap;
use std::time::Duration;

use quarry_core::config::FetcherConfig;
use quarry_core::error::AppError;
use quarry_core::traits::{FetchedPage, Fetcher};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

pub(crate) const USER_AGENT: &str = "quarry/0.1";

/// HTTP fetcher for static pages, using reqwest.
///
/// Issues one GET per [`Fetcher::fetch`] call with the configured headers
/// and timeout. No retries.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout, &BTreeMap::new())?,
            timeout,
        })
    }

    /// Builds a fetcher from the `fetcher` section of a scraper config.
    pub fn from_config(config: &FetcherConfig) -> Result<Self, AppError> {
        let timeout = config.timeout();
        Ok(Self {
            client: build_client(timeout, &config.headers)?,
            timeout,
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;
        read_page(response, url).await
    }

    async fn cleanup(&mut self) {
        tracing::debug!("HTTP fetcher released");
    }
}

pub(crate) fn build_client(
    timeout: Duration,
    headers: &BTreeMap<String, String>,
) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .default_headers(header_map(headers)?)
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            AppError::ConfigError(format!("invalid value for header `{name}`: {e}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

pub(crate) fn send_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_millis() as u64)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

/// Turns a response into a page, treating any non-2xx status as an error.
pub(crate) async fn read_page(response: Response, url: &str) -> Result<FetchedPage, AppError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::HttpError(format!(
            "HTTP {} for {}",
            status.as_u16(),
            url
        )));
    }
    let final_url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

    Ok(FetchedPage {
        url: final_url,
        status: status.as_u16(),
        body,
    })
}
