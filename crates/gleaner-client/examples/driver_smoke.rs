/// Smoke-test for `ChromiumDriver`.
///
/// Launches Chromium, opens <https://example.com>, reads the `<h1>` through a
/// locator and saves a snapshot of it.
///
/// Run with:
///   cargo run -p gleaner-client --example driver_smoke
use std::time::Duration;

use gleaner_client::{BrowserOptions, ChromiumDriver};
use gleaner_core::locator::Locator;
use gleaner_core::models::Probe;
use gleaner_core::traits::Driver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let headless = std::env::args().any(|a| a == "--headless");
    let options = BrowserOptions::default()
        .headless(headless)
        .with_slow_mo(Duration::ZERO);

    println!("Launching browser (headless={headless})…");
    let driver = ChromiumDriver::launch(&options).await?;

    let url = "https://example.com";
    println!("Opening {url} …");
    driver.goto(url).await?;

    let heading = Locator::css("h1").first();
    let text = driver.inner_text(&heading, Duration::from_secs(10)).await?;
    assert_eq!(
        text,
        Probe::Ready("Example Domain".to_string()),
        "Unexpected <h1> text"
    );

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("heading.png");
    let shot = driver
        .screenshot(&heading, &path, Duration::from_secs(10))
        .await?;
    assert!(shot.is_ready(), "Screenshot of <h1> failed");

    let bytes = std::fs::metadata(&path)?.len();
    println!("OK: current URL {}", driver.current_url().await?);
    println!("Saved {bytes} bytes to {}", path.display());

    driver.close().await?;
    Ok(())
}
