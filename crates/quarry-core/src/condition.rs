use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::instruction::Condition;
use crate::traits::Session;

/// Evaluates `condition` against `session`.
///
/// Never fails: a session error or an elapsed timeout resolves to `false`.
pub async fn evaluate<S: Session>(condition: &Condition, session: &S, poll_interval: Duration) -> bool {
    match condition {
        Condition::Timeout { ms } => {
            sleep(Duration::from_millis(*ms)).await;
            true
        }
        Condition::SelectorPresent {
            selector,
            timeout_ms,
        } => {
            let deadline = Instant::now() + Duration::from_millis(*timeout_ms);
            loop {
                match session.count(selector).await {
                    Ok(n) if n > 0 => return true,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(selector = %selector, error = %e, "Condition check failed");
                        return false;
                    }
                }
                let now = Instant::now();
                if !session.is_live() || now >= deadline {
                    debug!(selector = %selector, "Selector did not appear");
                    return false;
                }
                let remaining = deadline - now;
                sleep(poll_interval.min(remaining).max(Duration::from_millis(1))).await;
            }
        }
        Condition::UrlContains { substring } => match session.current_url().await {
            Ok(url) => url.contains(substring.as_str()),
            Err(e) => {
                warn!(error = %e, "Could not read current URL");
                false
            }
        },
        Condition::ElementCountAtLeast { selector, count } => {
            match session.count(selector).await {
                Ok(n) => n >= *count,
                Err(e) => {
                    warn!(selector = %selector, error = %e, "Condition check failed");
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_page::StaticPage;
    use crate::testutil::MockSession;

    const POLL: Duration = Duration::from_millis(5);

    fn page() -> StaticPage {
        StaticPage::new(
            "https://example.com/odds?page=2",
            "<html><body><li>a</li><li>b</li></body></html>",
        )
    }

    #[tokio::test]
    async fn test_static_conditions() {
        let p = page();
        let present = Condition::SelectorPresent {
            selector: "li".into(),
            timeout_ms: 60_000,
        };
        assert!(evaluate(&present, &p, POLL).await);

        let absent = Condition::SelectorPresent {
            selector: ".missing".into(),
            timeout_ms: 60_000,
        };
        // A static page is checked once, never polled for a minute.
        let started = std::time::Instant::now();
        assert!(!evaluate(&absent, &p, POLL).await);
        assert!(started.elapsed() < Duration::from_secs(5));

        let url = Condition::UrlContains {
            substring: "page=2".into(),
        };
        assert!(evaluate(&url, &p, POLL).await);

        let count = Condition::ElementCountAtLeast {
            selector: "li".into(),
            count: 3,
        };
        assert!(!evaluate(&count, &p, POLL).await);
    }

    #[tokio::test]
    async fn test_invalid_selector_is_false() {
        let cond = Condition::ElementCountAtLeast {
            selector: "[[".into(),
            count: 1,
        };
        assert!(!evaluate(&cond, &page(), POLL).await);
    }

    #[tokio::test]
    async fn test_timeout_holds() {
        let cond = Condition::Timeout { ms: 1 };
        assert!(evaluate(&cond, &page(), POLL).await);
    }

    #[tokio::test]
    async fn test_live_selector_times_out() {
        let session = MockSession::new("https://example.com", "<html></html>");
        let cond = Condition::SelectorPresent {
            selector: ".late".into(),
            timeout_ms: 30,
        };
        assert!(!evaluate(&cond, &session, POLL).await);
    }

    #[tokio::test]
    async fn test_live_selector_appears() {
        let session = MockSession::new("https://example.com", "<html></html>");
        session.set_count(".late", 1);
        let cond = Condition::SelectorPresent {
            selector: ".late".into(),
            timeout_ms: 1_000,
        };
        assert!(evaluate(&cond, &session, POLL).await);
    }
}
