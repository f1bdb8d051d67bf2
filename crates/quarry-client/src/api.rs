use std::time::Duration;

use quarry_core::config::{AuthConfig, FetcherConfig, HttpMethod};
use quarry_core::error::AppError;
use quarry_core::traits::{FetchedPage, Fetcher};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;

use crate::fetcher::{build_client, read_page, send_error};

/// Fetcher for structured (JSON) payloads.
///
/// Supports a configurable method, JSON request body and credentials.
/// The response body is returned as-is; parsing happens in the run.
#[derive(Clone)]
pub struct ApiFetcher {
    client: Client,
    timeout: Duration,
    method: HttpMethod,
    body: Option<Value>,
    auth: Option<AuthConfig>,
}

impl ApiFetcher {
    pub fn from_config(config: &FetcherConfig) -> Result<Self, AppError> {
        let timeout = config.timeout();
        Ok(Self {
            client: build_client(timeout, &config.headers)?,
            timeout,
            method: config.method,
            body: config.body.clone(),
            auth: config.auth.clone(),
        })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let method = match self.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");

        if let Some(body) = &self.body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        match &self.auth {
            Some(AuthConfig::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
            Some(AuthConfig::ApiKey { key, header }) => request.header(header.as_str(), key),
            None => request,
        }
    }
}

impl Fetcher for ApiFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;
        read_page(response, url).await
    }

    async fn cleanup(&mut self) {
        tracing::debug!("API fetcher released");
    }
}
