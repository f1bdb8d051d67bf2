use std::path::PathBuf;

use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use quarry_core::config::SessionOptions;
use quarry_core::error::AppError;
use quarry_core::instruction::OptionChoice;
use quarry_core::traits::{FetchedPage, SelectOption, Session};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

/// Interactive session backed by headless Chromium over the DevTools Protocol.
///
/// One browser process and one tab per session. Elements are looked up by
/// selector on every call, so nothing goes stale across navigations.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launches Chromium and opens a blank tab.
    ///
    /// Requires a Chromium / Chrome binary: `$CHROME_BIN`, a well-known
    /// install path, or whatever `chromiumoxide` finds on its own.
    pub async fn launch(options: &SessionOptions) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .window_size(options.viewport.width, options.viewport.height);

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        if options.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::SessionError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::SessionError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::SessionError(format!("Failed to open tab: {e}")))?;

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, AppError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| AppError::SessionError(format!("Script failed: {e}")))?
            .into_value()
            .map_err(|e| AppError::SessionError(format!("Unexpected script result: {e}")))
    }

    async fn element(&self, selector: &str, index: usize) -> Result<Element, AppError> {
        let mut elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| AppError::SessionError(format!("Query `{selector}` failed: {e}")))?;
        if index >= elements.len() {
            return Err(AppError::SessionError(format!(
                "`{selector}` has no match at index {index}"
            )));
        }
        Ok(elements.swap_remove(index))
    }
}

/// JS expression yielding the `index`-th match of `selector`, or undefined.
fn nth(selector: &str, index: usize) -> String {
    format!("document.querySelectorAll({})[{index}]", js_string(selector))
}

fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

impl Session for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<FetchedPage, AppError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AppError::SessionError(format!("Failed to navigate to {url}: {e}")))?;
        let body = self.content().await?;
        let final_url = self.current_url().await?;
        Ok(FetchedPage {
            url: final_url,
            status: 200,
            body,
        })
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| AppError::SessionError(format!("Failed to read page content: {e}")))
    }

    async fn current_url(&self) -> Result<String, AppError> {
        self.page
            .url()
            .await
            .map_err(|e| AppError::SessionError(format!("Failed to read URL: {e}")))?
            .ok_or_else(|| AppError::SessionError("Page has no URL".to_string()))
    }

    async fn count(&self, selector: &str) -> Result<usize, AppError> {
        self.eval(format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        ))
        .await
    }

    async fn is_visible(&self, selector: &str, index: usize) -> Result<bool, AppError> {
        self.eval(format!(
            "(() => {{ const el = {}; if (!el) return false; \
             const s = getComputedStyle(el); const r = el.getBoundingClientRect(); \
             return s.display !== 'none' && s.visibility !== 'hidden' && (r.width > 0 || r.height > 0); }})()",
            nth(selector, index)
        ))
        .await
    }

    async fn is_enabled(&self, selector: &str, index: usize) -> Result<bool, AppError> {
        self.eval(format!(
            "(() => {{ const el = {}; if (!el) return false; \
             return !el.disabled && el.getAttribute('aria-disabled') !== 'true'; }})()",
            nth(selector, index)
        ))
        .await
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), AppError> {
        self.element(selector, index)
            .await?
            .click()
            .await
            .map_err(|e| AppError::SessionError(format!("Click on `{selector}` failed: {e}")))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, clear_first: bool) -> Result<(), AppError> {
        if clear_first {
            let _: bool = self
                .eval(format!(
                    "(() => {{ const el = {}; if (!el) return false; el.value = ''; return true; }})()",
                    nth(selector, 0)
                ))
                .await?;
        }
        let element = self.element(selector, 0).await?;
        element
            .click()
            .await
            .map_err(|e| AppError::SessionError(format!("Focus on `{selector}` failed: {e}")))?;
        element
            .type_str(text)
            .await
            .map_err(|e| AppError::SessionError(format!("Typing into `{selector}` failed: {e}")))?;
        Ok(())
    }

    async fn select_option(&self, selector: &str, choice: &OptionChoice) -> Result<(), AppError> {
        let matcher = match choice {
            OptionChoice::Value(v) => format!("o.value === {}", js_string(v)),
            OptionChoice::Label(l) => format!("o.text.trim() === {}", js_string(l)),
            OptionChoice::Index(i) => format!("i === {i}"),
        };
        let selected: bool = self
            .eval(format!(
                "(() => {{ const el = {}; if (!el) return false; \
                 const idx = Array.from(el.options).findIndex((o, i) => {matcher}); \
                 if (idx < 0) return false; el.selectedIndex = idx; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
                nth(selector, 0)
            ))
            .await?;
        if selected {
            Ok(())
        } else {
            Err(AppError::SessionError(format!(
                "`{selector}` has no option matching {choice:?}"
            )))
        }
    }

    async fn options(&self, selector: &str) -> Result<Vec<SelectOption>, AppError> {
        let options: Option<Vec<SelectOption>> = self
            .eval(format!(
                "(() => {{ const el = {}; if (!el || !el.options) return null; \
                 return Array.from(el.options).map(o => ({{ value: o.value, label: o.text.trim() }})); }})()",
                nth(selector, 0)
            ))
            .await?;
        options.ok_or_else(|| {
            AppError::SessionError(format!("no select control matches `{selector}`"))
        })
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), AppError> {
        let _: bool = self
            .eval(format!("(() => {{ window.scrollBy(0, {dy}); return true; }})()"))
            .await?;
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<bool, AppError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| AppError::SessionError(format!("Query `{selector}` failed: {e}")))?;
        let Some(element) = elements.first() else {
            return Ok(false);
        };
        element
            .scroll_into_view()
            .await
            .map_err(|e| AppError::SessionError(format!("Scroll to `{selector}` failed: {e}")))?;
        Ok(true)
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.page.clone().close().await {
            tracing::debug!(error = %e, "Tab already closed");
        }
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "Browser did not close cleanly");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        tracing::debug!("Browser session closed");
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via snap, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags and breaks headless mode,
/// so the real binary inside the snap is tried first. `None` lets
/// `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_is_quoted_for_js() {
        assert_eq!(
            nth(r#"a[href="x"]"#, 2),
            r#"document.querySelectorAll("a[href=\"x\"]")[2]"#
        );
    }
}
