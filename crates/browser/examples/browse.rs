//! Attach to a running Chrome and drive a page through the session core

use browser::{Browser, BrowserConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BrowserConfig {
        ws_url: std::env::args()
            .nth(1)
            .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string()),
        ..Default::default()
    };

    let browser = Browser::connect(config).await?;
    let version = browser.version().await?;
    println!("🌐 connected: {}", version.product);

    // watch the graph change while we work
    let mut events = browser.event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("📢 {event:?}");
        }
    });

    let context = browser.new_context().await?;
    let page = context.new_page(Some("https://www.rust-lang.org")).await?;
    page.enable_domain("Page").await?;

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let title = page.evaluate("document.title").await?;
    println!("📄 {} - {}", page.url(), title["result"]["value"]);

    page.close().await?;
    context.dispose().await?;
    browser.close().await?;
    println!("🛑 done");

    Ok(())
}
