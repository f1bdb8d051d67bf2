use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::instruction::OptionChoice;
use crate::models::{ScrapeResult, SubmitReport};

/// A document obtained from a content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// One `<option>` of a select control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Retrieves a whole document in one request (static HTML or a JSON payload).
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;

    /// Releases any resources held by the fetcher.
    fn cleanup(&mut self) -> impl Future<Output = ()> + Send;
}

/// A live page that instructions can interact with.
///
/// Elements are addressed by a CSS selector plus the index of the match,
/// so no element handles outlive a call.
pub trait Session: Send + Sync {
    /// Loads `url` in the session and returns the rendered document.
    fn navigate(&self, url: &str) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;

    /// Current rendered HTML.
    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn current_url(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Number of elements matching `selector`.
    fn count(&self, selector: &str) -> impl Future<Output = Result<usize, AppError>> + Send;

    fn is_visible(
        &self,
        selector: &str,
        index: usize,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn is_enabled(
        &self,
        selector: &str,
        index: usize,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn click(&self, selector: &str, index: usize)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Types `text` into the first element matching `selector`.
    fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn select_option(
        &self,
        selector: &str,
        choice: &OptionChoice,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Options of the first select control matching `selector`.
    fn options(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<SelectOption>, AppError>> + Send;

    /// Scrolls the viewport vertically by `dy` pixels (negative = up).
    fn scroll_by(&self, dy: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Scrolls the first match into view. `Ok(false)` when nothing matches.
    fn scroll_into_view(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Whether the page can change between calls. Conditions against a
    /// non-live page are checked once instead of polled.
    fn is_live(&self) -> bool {
        true
    }

    /// Closes the session. Called exactly once per run.
    fn cleanup(&mut self) -> impl Future<Output = ()> + Send;
}

/// Persists finalized results.
pub trait RecordStore: Send + Sync {
    /// Stores every record of `result`, idempotent on (scraper, bucket, key).
    ///
    /// Per-record failures are reported in the [`SubmitReport`]; an `Err`
    /// means nothing could be stored.
    fn submit(
        &self,
        result: &ScrapeResult,
    ) -> impl Future<Output = Result<SubmitReport, AppError>> + Send;
}

/// A no-op RecordStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl RecordStore for NullStore {
    async fn submit(&self, _result: &ScrapeResult) -> Result<SubmitReport, AppError> {
        Ok(SubmitReport::default())
    }
}
