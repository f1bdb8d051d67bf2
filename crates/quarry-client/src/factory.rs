use quarry_core::config::{FetcherConfig, FetcherKind};
use quarry_core::error::AppError;
use quarry_core::runner::ContentSource;
use quarry_core::traits::{FetchedPage, Fetcher};

use crate::api::ApiFetcher;
use crate::fetcher::ReqwestFetcher;

/// The single-request fetchers, behind one type.
#[derive(Clone)]
pub enum HttpFetcher {
    Static(ReqwestFetcher),
    Api(ApiFetcher),
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        match self {
            HttpFetcher::Static(f) => f.fetch(url).await,
            HttpFetcher::Api(f) => f.fetch(url).await,
        }
    }

    async fn cleanup(&mut self) {
        match self {
            HttpFetcher::Static(f) => f.cleanup().await,
            HttpFetcher::Api(f) => f.cleanup().await,
        }
    }
}

#[cfg(feature = "browser")]
pub type SessionSource = crate::browser_session::BrowserSession;

/// Without the `browser` feature no session is ever created; the type only
/// fills the session slot of [`ContentSource`].
#[cfg(not(feature = "browser"))]
pub type SessionSource = quarry_core::static_page::StaticPage;

pub type Source = ContentSource<HttpFetcher, SessionSource>;

/// Creates the content source a fetcher configuration asks for.
pub struct SourceFactory;

impl SourceFactory {
    pub async fn create(config: &FetcherConfig) -> Result<Source, AppError> {
        match config.kind {
            FetcherKind::Static => Ok(ContentSource::SingleShot(HttpFetcher::Static(
                ReqwestFetcher::from_config(config)?,
            ))),
            FetcherKind::Api => Ok(ContentSource::Structured(HttpFetcher::Api(
                ApiFetcher::from_config(config)?,
            ))),
            FetcherKind::Session => Self::session(config).await,
        }
    }

    #[cfg(feature = "browser")]
    async fn session(config: &FetcherConfig) -> Result<Source, AppError> {
        let session =
            crate::browser_session::BrowserSession::launch(&config.session_options).await?;
        Ok(ContentSource::Session(session))
    }

    #[cfg(not(feature = "browser"))]
    async fn session(_config: &FetcherConfig) -> Result<Source, AppError> {
        Err(AppError::ConfigError(
            "session fetchers need the `browser` feature; rebuild with --features browser"
                .to_string(),
        ))
    }
}
