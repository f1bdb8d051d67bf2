//! Test utilities: mock implementations of the core traits.
//!
//! All mocks share their state through `Arc<Mutex<_>>`, so a clone handed to
//! the code under test still records calls the test can assert on.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use scraper::Html;

use crate::error::AppError;
use crate::extract::parse_selector;
use crate::instruction::OptionChoice;
use crate::models::{RecordError, ScrapeResult, SubmitReport};
use crate::runner::{RunEvent, RunReporter};
use crate::traits::{FetchedPage, Fetcher, RecordStore, SelectOption, Session};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FetcherState {
    responses: Vec<Result<String, AppError>>,
    urls: Vec<String>,
    cleanups: usize,
}

/// Mock fetcher returning queued bodies.
#[derive(Clone)]
pub struct MockFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl MockFetcher {
    pub fn new(body: &str) -> Self {
        Self::with_responses(vec![Ok(body.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    /// Each fetch pops the first response. Once empty, fetches return an
    /// empty document.
    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FetcherState {
                responses,
                ..FetcherState::default()
            })),
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn cleanup_calls(&self) -> usize {
        self.state.lock().unwrap().cleanups
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.to_string());
        let body = if state.responses.is_empty() {
            Ok("<html><body></body></html>".to_string())
        } else {
            state.responses.remove(0)
        }?;
        Ok(FetchedPage {
            url: url.to_string(),
            status: 200,
            body,
        })
    }

    async fn cleanup(&mut self) {
        self.state.lock().unwrap().cleanups += 1;
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    url: String,
    html: String,
    pages: HashMap<String, String>,
    counts: HashMap<String, usize>,
    hidden: HashSet<(String, usize)>,
    disabled: HashSet<String>,
    options: HashMap<String, Vec<SelectOption>>,
    remove_after: HashMap<String, usize>,
    failing_urls: HashSet<String>,
    clicks: Vec<(String, usize)>,
    navigations: Vec<String>,
    typed: Vec<(String, String, bool)>,
    selected: Vec<(String, OptionChoice)>,
    scrolls: Vec<i64>,
    cleanups: usize,
}

impl SessionState {
    fn count(&self, selector: &str) -> Result<usize, AppError> {
        if let Some(&after) = self.remove_after.get(selector) {
            let clicked = self.clicks.iter().filter(|(s, _)| s == selector).count();
            if clicked >= after {
                return Ok(0);
            }
        }
        if let Some(&n) = self.counts.get(selector) {
            return Ok(n);
        }
        let parsed = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document.select(&parsed).count())
    }
}

/// Scriptable live session.
///
/// Element counts come from [`MockSession::set_count`] when set, otherwise
/// from the current HTML. Every interaction is recorded.
#[derive(Clone)]
pub struct MockSession {
    state: Arc<Mutex<SessionState>>,
}

impl MockSession {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                url: url.to_string(),
                html: html.to_string(),
                ..SessionState::default()
            })),
        }
    }

    pub fn set_count(&self, selector: &str, count: usize) {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(selector.to_string(), count);
    }

    pub fn set_hidden(&self, selector: &str, index: usize) {
        self.state
            .lock()
            .unwrap()
            .hidden
            .insert((selector.to_string(), index));
    }

    pub fn set_disabled(&self, selector: &str) {
        self.state
            .lock()
            .unwrap()
            .disabled
            .insert(selector.to_string());
    }

    pub fn set_options(&self, selector: &str, options: Vec<SelectOption>) {
        self.state
            .lock()
            .unwrap()
            .options
            .insert(selector.to_string(), options);
    }

    /// `selector` stops matching once it has been clicked `clicks` times.
    pub fn remove_after_clicks(&self, selector: &str, clicks: usize) {
        self.state
            .lock()
            .unwrap()
            .remove_after
            .insert(selector.to_string(), clicks);
    }

    pub fn fail_navigation(&self, url: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_urls
            .insert(url.to_string());
    }

    /// HTML served after navigating to `url`.
    pub fn set_page(&self, url: &str, html: &str) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), html.to_string());
    }

    pub fn clicks(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn typed(&self) -> Vec<(String, String, bool)> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn selected(&self) -> Vec<(String, OptionChoice)> {
        self.state.lock().unwrap().selected.clone()
    }

    pub fn scrolls(&self) -> Vec<i64> {
        self.state.lock().unwrap().scrolls.clone()
    }

    pub fn cleanup_calls(&self) -> usize {
        self.state.lock().unwrap().cleanups
    }
}

impl Session for MockSession {
    async fn navigate(&self, url: &str) -> Result<FetchedPage, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_urls.contains(url) {
            return Err(AppError::SessionError(format!("navigation to {url} failed")));
        }
        state.navigations.push(url.to_string());
        state.url = url.to_string();
        if let Some(html) = state.pages.get(url).cloned() {
            state.html = html;
        }
        Ok(FetchedPage {
            url: state.url.clone(),
            status: 200,
            body: state.html.clone(),
        })
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn current_url(&self) -> Result<String, AppError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn count(&self, selector: &str) -> Result<usize, AppError> {
        self.state.lock().unwrap().count(selector)
    }

    async fn is_visible(&self, selector: &str, index: usize) -> Result<bool, AppError> {
        let state = self.state.lock().unwrap();
        Ok(!state.hidden.contains(&(selector.to_string(), index)))
    }

    async fn is_enabled(&self, selector: &str, _index: usize) -> Result<bool, AppError> {
        Ok(!self.state.lock().unwrap().disabled.contains(selector))
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .clicks
            .push((selector.to_string(), index));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, clear_first: bool) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .typed
            .push((selector.to_string(), text.to_string(), clear_first));
        Ok(())
    }

    async fn select_option(&self, selector: &str, choice: &OptionChoice) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .selected
            .push((selector.to_string(), choice.clone()));
        Ok(())
    }

    async fn options(&self, selector: &str) -> Result<Vec<SelectOption>, AppError> {
        self.state
            .lock()
            .unwrap()
            .options
            .get(selector)
            .cloned()
            .ok_or_else(|| AppError::SessionError(format!("no select control matches `{selector}`")))
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), AppError> {
        self.state.lock().unwrap().scrolls.push(dy);
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<bool, AppError> {
        Ok(self.state.lock().unwrap().count(selector)? > 0)
    }

    async fn cleanup(&mut self) {
        self.state.lock().unwrap().cleanups += 1;
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock store that records submissions.
#[derive(Clone, Default)]
pub struct MockStore {
    submitted: Arc<Mutex<Vec<ScrapeResult>>>,
    failing_collections: Arc<Mutex<HashSet<String>>>,
    submit_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    /// Records of `collection` are rejected individually.
    pub fn fail_collection(&self, collection: &str) {
        self.failing_collections
            .lock()
            .unwrap()
            .insert(collection.to_string());
    }

    /// The next submit fails as a whole.
    pub fn fail_next_submit(&self, error: AppError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn submitted(&self) -> Vec<ScrapeResult> {
        self.submitted.lock().unwrap().clone()
    }
}

impl RecordStore for MockStore {
    async fn submit(&self, result: &ScrapeResult) -> Result<SubmitReport, AppError> {
        if let Some(e) = self.submit_error.lock().unwrap().take() {
            return Err(e);
        }
        self.submitted.lock().unwrap().push(result.clone());

        let failing = self.failing_collections.lock().unwrap();
        let mut report = SubmitReport::default();
        for (bucket, record) in result.records() {
            if failing.contains(&record.collection) {
                report.errors.push(RecordError {
                    bucket,
                    collection: record.collection.clone(),
                    key: record.key.clone(),
                    message: "rejected".to_string(),
                });
            } else {
                report.persisted += 1;
            }
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock run reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RunReporter for MockReporter {
    fn report(&self, event: RunEvent<'_>) {
        let label = match &event {
            RunEvent::Started { .. } => "started",
            RunEvent::ContentLoaded { .. } => "content_loaded",
            RunEvent::Cancelled { .. } => "cancelled",
            RunEvent::Failed { .. } => "failed",
            RunEvent::Finished { .. } => "finished",
            RunEvent::Persisted { .. } => "persisted",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
