use std::time::Duration;

use url::Url;

use crate::collect::{Collector, Harvest};
use crate::error::AppError;
use crate::events::HarvestReporter;
use crate::locator::Locator;
use crate::models::Probe;
use crate::traits::Driver;

/// How to reach a profile's followers dialog.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Site root; profiles live at `<base>/<identifier>/`.
    pub base_url: Url,
    /// Bound on each step: profile render, link click, dialog appearance.
    pub timeout: Duration,
}

impl ProfileConfig {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("Invalid base URL '{base_url}': {e}")))?;
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(60),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn profile_url(&self, target: &str) -> Result<Url, AppError> {
        if target.is_empty() || target.contains('/') {
            return Err(AppError::Config(format!(
                "Invalid target identifier '{target}'"
            )));
        }
        self.base_url
            .join(&format!("{target}/"))
            .map_err(|e| AppError::Config(format!("Invalid profile URL for '{target}': {e}")))
    }
}

fn followers_text() -> Locator {
    Locator::text("a, span", "followers", false).first()
}

fn followers_link() -> Locator {
    Locator::text("a, [role='link']", "followers", false).first()
}

fn dialog() -> Locator {
    Locator::css("div[role='dialog']").first()
}

fn require(probe: Probe<()>, what: &str, target: &str) -> Result<(), AppError> {
    match probe {
        Probe::Ready(()) => Ok(()),
        Probe::TimedOut => Err(AppError::Navigation(format!(
            "Timed out waiting for {what} on profile '{target}'"
        ))),
        Probe::Absent => Err(AppError::Navigation(format!(
            "No {what} on profile '{target}'"
        ))),
    }
}

/// Opens `target`'s profile and its followers dialog.
///
/// Every step is required: without the dialog there is nothing to collect.
pub async fn open_followers<D: Driver>(
    driver: &D,
    config: &ProfileConfig,
    target: &str,
) -> Result<(), AppError> {
    let url = config.profile_url(target)?;
    tracing::info!(%url, "Opening profile");
    driver.goto(url.as_str()).await?;

    require(
        driver.wait_visible(&followers_text(), config.timeout).await?,
        "followers count",
        target,
    )?;
    require(
        driver.click(&followers_link(), config.timeout).await?,
        "followers link",
        target,
    )?;
    require(
        driver.wait_visible(&dialog(), config.timeout).await?,
        "followers dialog",
        target,
    )?;
    Ok(())
}

/// Opens the followers dialog of `target` and collects every handle in it.
pub async fn harvest_followers<D: Driver, R: HarvestReporter>(
    driver: &D,
    config: &ProfileConfig,
    collector: &Collector<R>,
    target: &str,
) -> Result<Harvest, AppError> {
    open_followers(driver, config, target).await?;
    collector.collect(driver).await
}
