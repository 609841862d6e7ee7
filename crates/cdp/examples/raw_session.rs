//! Raw session usage - connect, query the browser, watch target discovery

use std::sync::Arc;

use cdp::Connection;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let ws_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());

    let conn = Connection::connect(&ws_url).await?;
    let root = conn.root_session();

    let version = root.send("Browser.getVersion", None).await?;
    println!("🌐 connected: {}", version["product"]);

    root.on(
        "Target.targetCreated",
        Arc::new(|params| {
            println!(
                "📢 target created: {} ({})",
                params["targetInfo"]["targetId"], params["targetInfo"]["type"]
            );
        }),
    );
    root.send("Target.setDiscoverTargets", Some(json!({"discover": true})))
        .await?;

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    conn.close().await?;
    println!("🛑 connection closed");

    Ok(())
}
