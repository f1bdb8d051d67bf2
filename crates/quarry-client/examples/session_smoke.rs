/// Smoke-test for `BrowserSession`.
///
/// Launches a headless Chromium, opens <https://example.com>, and checks the
/// rendered page through the same calls the instruction executor uses.
///
/// Run with:
///   cargo run -p quarry-client --example session_smoke --features browser
use quarry_client::BrowserSession;
use quarry_core::config::SessionOptions;
use quarry_core::traits::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let mut session = BrowserSession::launch(&SessionOptions::default()).await?;

    let page = session.navigate("https://example.com").await?;
    let headings = session.count("h1").await?;
    let visible = session.is_visible("h1", 0).await?;
    session.cleanup().await;

    anyhow::ensure!(headings == 1, "expected one <h1>, found {headings}");
    anyhow::ensure!(visible, "<h1> is not visible");
    println!("OK: {} bytes from {}", page.body.len(), page.url);
    Ok(())
}
