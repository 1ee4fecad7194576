/// Smoke-test for `BrowserSessionFactory`.
///
/// Launches a headless Chromium, opens a session on <https://example.com>,
/// and exercises navigation, content capture, and script evaluation.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use reportd_client::BrowserSessionFactory;
use reportd_core::traits::{SessionFactory, WebSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    println!("Launching headless browser…");
    let factory = BrowserSessionFactory::new().await?;
    let session = factory.open().await?;

    let url = "https://example.com";
    println!("Navigating to {url} …");
    session.navigate(url).await?;

    let html = session.content().await?;
    assert!(
        html.contains("<h1>Example Domain</h1>"),
        "Expected <h1> not found in rendered HTML"
    );

    let title = session.evaluate("document.title").await?;
    println!("Title: {title}");

    session.close().await?;
    println!("OK — got {} bytes of rendered HTML", html.len());
    Ok(())
}
