//! A fetched HTML document exposed through the [`Session`] interface.
//!
//! Lets conditions and collects run against single-shot content. Anything
//! that would change the page is unsupported.

use scraper::Html;

use crate::error::AppError;
use crate::extract::parse_selector;
use crate::instruction::OptionChoice;
use crate::traits::{FetchedPage, SelectOption, Session};

#[derive(Debug, Clone)]
pub struct StaticPage {
    url: String,
    html: String,
}

impl StaticPage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            html: html.to_string(),
        }
    }

    pub fn from_fetched(page: FetchedPage) -> Self {
        Self {
            url: page.url,
            html: page.body,
        }
    }

    fn count_matches(&self, selector: &str) -> Result<usize, AppError> {
        let selector = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document.select(&selector).count())
    }

    fn enabled_at(&self, selector: &str, index: usize) -> Result<bool, AppError> {
        let selector = parse_selector(selector)?;
        let document = Html::parse_document(&self.html);
        Ok(document.select(&selector).nth(index).is_some_and(|el| {
            let el = el.value();
            el.attr("disabled").is_none() && el.attr("aria-disabled") != Some("true")
        }))
    }

    fn select_options(&self, selector: &str) -> Result<Vec<SelectOption>, AppError> {
        let select = parse_selector(selector)?;
        let option = parse_selector("option")?;
        let document = Html::parse_document(&self.html);
        let Some(control) = document.select(&select).next() else {
            return Err(AppError::Extraction(format!(
                "no select control matches `{selector}`"
            )));
        };
        Ok(control
            .select(&option)
            .map(|opt| {
                let label = opt.text().collect::<String>().trim().to_string();
                let value = opt
                    .value()
                    .attr("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| label.clone());
                SelectOption { value, label }
            })
            .collect())
    }
}

impl Session for StaticPage {
    async fn navigate(&self, _url: &str) -> Result<FetchedPage, AppError> {
        Err(AppError::Unsupported("navigate"))
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok(self.html.clone())
    }

    async fn current_url(&self) -> Result<String, AppError> {
        Ok(self.url.clone())
    }

    async fn count(&self, selector: &str) -> Result<usize, AppError> {
        self.count_matches(selector)
    }

    async fn is_visible(&self, selector: &str, index: usize) -> Result<bool, AppError> {
        Ok(index < self.count_matches(selector)?)
    }

    async fn is_enabled(&self, selector: &str, index: usize) -> Result<bool, AppError> {
        self.enabled_at(selector, index)
    }

    async fn click(&self, _selector: &str, _index: usize) -> Result<(), AppError> {
        Err(AppError::Unsupported("click"))
    }

    async fn type_text(
        &self,
        _selector: &str,
        _text: &str,
        _clear_first: bool,
    ) -> Result<(), AppError> {
        Err(AppError::Unsupported("input"))
    }

    async fn select_option(&self, _selector: &str, _choice: &OptionChoice) -> Result<(), AppError> {
        Err(AppError::Unsupported("select"))
    }

    async fn options(&self, selector: &str) -> Result<Vec<SelectOption>, AppError> {
        self.select_options(selector)
    }

    async fn scroll_by(&self, _dy: i64) -> Result<(), AppError> {
        Err(AppError::Unsupported("scroll"))
    }

    async fn scroll_into_view(&self, _selector: &str) -> Result<bool, AppError> {
        Err(AppError::Unsupported("scroll"))
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn cleanup(&mut self) {}
}
