pub mod api;
#[cfg(feature = "browser")]
pub mod browser_session;
pub mod factory;
pub mod fetcher;

pub use api::ApiFetcher;
#[cfg(feature = "browser")]
pub use browser_session::BrowserSession;
pub use factory::{HttpFetcher, SessionSource, Source, SourceFactory};
pub use fetcher::ReqwestFetcher;
