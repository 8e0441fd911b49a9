//! Ordered fallback strategies for clicking an element by its label.

use std::time::Duration;

use crate::error::AppError;
use crate::locator::{Locator, xpath_literal};
use crate::models::Probe;
use crate::traits::Driver;

/// Label variants of the "maybe later" buttons shown after login
/// (notification opt-in, save login info, ...).
pub const DEFAULT_PROMPT_LABELS: &[&str] = &["Not now", "Not Now", "Not now!"];

/// One way of turning a human-readable label into a [`Locator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorStrategy {
    /// `<button>` whose normalized text equals the label.
    ButtonText,
    /// Any `[role="button"]` whose normalized text equals the label.
    RoleButtonText,
    /// Any clickable-shaped element whose normalized, lowercased text
    /// contains the lowercased label.
    ClickableContains,
}

impl SelectorStrategy {
    pub fn locator(&self, label: &str) -> Locator {
        match self {
            SelectorStrategy::ButtonText => Locator::text("button", label, true).first(),
            SelectorStrategy::RoleButtonText => {
                Locator::text("[role=\"button\"]", label, true).first()
            }
            SelectorStrategy::ClickableContains => Locator::xpath(format!(
                "//*[(@role='button' or self::button or self::div or self::span) \
                 and contains(translate(normalize-space(.), \
                 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), {})]",
                xpath_literal(&label.to_lowercase())
            ))
            .first(),
        }
    }
}

/// Strategies tried in order until one locates and activates an element.
#[derive(Debug, Clone)]
pub struct StrategySet {
    strategies: Vec<SelectorStrategy>,
    /// Pause after a successful click so transient UI can reflow.
    settle: Duration,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self {
            strategies: vec![
                SelectorStrategy::ButtonText,
                SelectorStrategy::RoleButtonText,
                SelectorStrategy::ClickableContains,
            ],
            settle: Duration::from_millis(400),
        }
    }
}

impl StrategySet {
    pub fn new(strategies: Vec<SelectorStrategy>) -> Self {
        Self {
            strategies,
            ..Self::default()
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn strategies(&self) -> &[SelectorStrategy] {
        &self.strategies
    }

    /// Concrete locators for `label`, in the order they are tried.
    pub fn locators(&self, label: &str) -> Vec<Locator> {
        self.strategies.iter().map(|s| s.locator(label)).collect()
    }

    /// Clicks the first element any strategy finds for `label`.
    ///
    /// Returns `Ok(false)` when every strategy came up empty or timed out;
    /// a legitimately absent target is not an error.
    pub async fn try_label<D: Driver>(
        &self,
        driver: &D,
        label: &str,
        timeout: Duration,
    ) -> Result<bool, AppError> {
        for strategy in &self.strategies {
            let locator = strategy.locator(label);
            match driver.click(&locator, timeout).await? {
                Probe::Ready(()) => {
                    tracing::debug!(%label, ?strategy, "Clicked");
                    driver.settle(self.settle).await;
                    return Ok(true);
                }
                Probe::TimedOut | Probe::Absent => continue,
            }
        }
        Ok(false)
    }

    /// Dismisses interstitial prompts.
    ///
    /// Runs up to `passes` passes; each pass stops at the first label variant
    /// that could be clicked, and a pass that clicks nothing ends the loop.
    /// Returns the number of prompts dismissed.
    pub async fn dismiss_prompts<D: Driver>(
        &self,
        driver: &D,
        labels: &[String],
        passes: u32,
        timeout: Duration,
    ) -> Result<u32, AppError> {
        let mut dismissed = 0;
        for _ in 0..passes {
            let mut clicked = false;
            for label in labels {
                if self.try_label(driver, label, timeout).await? {
                    clicked = true;
                    break;
                }
            }
            if !clicked {
                break;
            }
            dismissed += 1;
        }
        if dismissed > 0 {
            tracing::info!(dismissed, "Dismissed interstitial prompts");
        }
        Ok(dismissed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockDriver;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn labels() -> Vec<String> {
        DEFAULT_PROMPT_LABELS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strategies_render_expected_locators() {
        let set = StrategySet::default();
        let rendered: Vec<String> = set.locators("Not Now").iter().map(|l| l.to_string()).collect();
        assert_eq!(rendered[0], "button:text-is(\"Not Now\") >> nth=0");
        assert_eq!(rendered[1], "[role=\"button\"]:text-is(\"Not Now\") >> nth=0");
        assert!(rendered[2].starts_with("xpath=//*[(@role='button'"));
        assert!(rendered[2].contains("'not now')]"));
    }

    #[tokio::test]
    async fn first_matching_strategy_short_circuits() {
        let set = StrategySet::default();
        let button = SelectorStrategy::ButtonText.locator("Not now");
        let role = SelectorStrategy::RoleButtonText.locator("Not now");
        let driver = MockDriver::new()
            .with_clickable(&button, 1)
            .with_clickable(&role, 1);

        assert!(set.try_label(&driver, "Not now", TIMEOUT).await.unwrap());
        assert_eq!(driver.count_actions("click"), 1);
        assert_eq!(driver.actions()[1], "settle 400ms");
    }

    #[tokio::test]
    async fn custom_set_only_tries_its_own_strategies() {
        let set = StrategySet::new(vec![SelectorStrategy::RoleButtonText])
            .with_settle(Duration::from_millis(50));
        assert_eq!(set.strategies(), &[SelectorStrategy::RoleButtonText]);

        let button = SelectorStrategy::ButtonText.locator("Skip");
        let driver = MockDriver::new().with_clickable(&button, 1);
        assert!(!set.try_label(&driver, "Skip", TIMEOUT).await.unwrap());

        let role = SelectorStrategy::RoleButtonText.locator("Skip");
        let driver = MockDriver::new().with_clickable(&role, 1);
        assert!(set.try_label(&driver, "Skip", TIMEOUT).await.unwrap());
        assert_eq!(driver.actions(), vec![format!("click {role}"), "settle 50ms".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_later_strategies() {
        let set = StrategySet::default();
        let fuzzy = SelectorStrategy::ClickableContains.locator("Not now");
        let driver = MockDriver::new().with_clickable(&fuzzy, 1);

        assert!(set.try_label(&driver, "Not now", TIMEOUT).await.unwrap());
        assert_eq!(driver.actions()[0], format!("click {fuzzy}"));
    }

    #[tokio::test]
    async fn absent_target_is_a_negative_result() {
        let set = StrategySet::default();
        let driver = MockDriver::new();
        assert!(!set.try_label(&driver, "Not now", TIMEOUT).await.unwrap());
        assert!(driver.actions().is_empty());
    }

    #[tokio::test]
    async fn invisible_target_times_out_without_error() {
        let set = StrategySet::default();
        let button = SelectorStrategy::ButtonText.locator("Not now");
        let driver = MockDriver::new().with_hidden_element(&button);
        assert!(!set.try_label(&driver, "Not now", TIMEOUT).await.unwrap());
    }

    #[tokio::test]
    async fn dismiss_prompts_stops_after_an_empty_pass() {
        let set = StrategySet::default();
        let first = SelectorStrategy::ButtonText.locator("Not now");
        let second = SelectorStrategy::RoleButtonText.locator("Not Now");
        let driver = MockDriver::new()
            .with_clickable(&first, 1)
            .with_clickable(&second, 1);

        let dismissed = set
            .dismiss_prompts(&driver, &labels(), 3, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(dismissed, 2);
        assert_eq!(driver.count_actions("click"), 2);
    }

    #[tokio::test]
    async fn dismiss_prompts_is_bounded_by_passes() {
        let set = StrategySet::default();
        let sticky = SelectorStrategy::ButtonText.locator("Not now");
        let driver = MockDriver::new().with_clickable(&sticky, 100);

        let dismissed = set
            .dismiss_prompts(&driver, &labels(), 3, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(dismissed, 3);
    }
}
