//! Convergence-based harvesting of an infinite-scroll list.
//!
//! Lazy-loading feeds give no "end of list" signal, only a decaying rate of
//! new items. The engine keeps scrolling until several consecutive rounds add
//! nothing, with a hard round cap for containers that never settle.

use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::events::{HarvestEvent, HarvestReporter, TracingReporter};
use crate::locator::Locator;
use crate::models::{IdentifierSet, Probe};
use crate::traits::Driver;
use crate::util::identifier_from_href;

/// Links inside the followers dialog that point at a profile.
pub const DEFAULT_LINK_SELECTOR: &str = "div[role='dialog'] a[role='link'][href^='/']";

/// Candidate scroll containers, most specific first.
pub const DEFAULT_CONTAINER_HINTS: &[&str] = &[
    "div[role='dialog'] div[style*='overflow: auto']",
    "div[role='dialog'] div[style*='overflow:auto']",
    "div[role='dialog'] div[style*='overflow: hidden auto']",
    "div[role='dialog'] div[style*='overflow: scroll']",
    "div[role='dialog'] ._aano",
    "div[role='dialog'] ul",
    "div[role='dialog']",
];

/// Thresholds for deciding a feed is exhausted.
///
/// Both thresholds were tuned against one follower dialog; other feeds may
/// need different values.
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// Consecutive rounds without new identifiers before stopping.
    pub stable_rounds: u32,
    /// Hard upper bound on scroll rounds.
    pub max_rounds: u32,
    /// Wait after each scroll for new content to render.
    pub settle: Duration,
    /// Page scroll distance used when no container is available.
    pub wheel_delta: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            stable_rounds: 3,
            max_rounds: 60,
            settle: Duration::from_secs(1),
            wheel_delta: 2000.0,
        }
    }
}

impl ConvergenceConfig {
    pub fn with_stable_rounds(mut self, stable_rounds: u32) -> Self {
        self.stable_rounds = stable_rounds;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.stable_rounds == 0 {
            return Err(AppError::Config("stable_rounds must be at least 1".into()));
        }
        if self.max_rounds == 0 {
            return Err(AppError::Config("max_rounds must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stable_rounds` consecutive rounds added nothing.
    Converged,
    /// `max_rounds` was reached first.
    RoundCap,
}

#[derive(Debug, Clone, Serialize)]
pub struct Harvest {
    pub identifiers: IdentifierSet,
    pub rounds: u32,
    pub reason: StopReason,
}

/// Where the advance step scrolls.
enum ScrollTarget {
    Container(Locator),
    Page,
}

/// Scrolls a list until it stops yielding new identifiers.
pub struct Collector<R = TracingReporter> {
    config: ConvergenceConfig,
    links: Locator,
    hints: Vec<String>,
    reporter: R,
}

impl Collector<TracingReporter> {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self {
            config,
            links: Locator::css(DEFAULT_LINK_SELECTOR),
            hints: DEFAULT_CONTAINER_HINTS.iter().map(|s| s.to_string()).collect(),
            reporter: TracingReporter,
        }
    }
}

impl<R: HarvestReporter> Collector<R> {
    pub fn with_reporter<R2: HarvestReporter>(self, reporter: R2) -> Collector<R2> {
        Collector {
            config: self.config,
            links: self.links,
            hints: self.hints,
            reporter,
        }
    }

    /// Links whose `href` carries the identifier.
    pub fn with_links(mut self, links: Locator) -> Self {
        self.links = links;
        self
    }

    /// Ordered scroll-container candidates (CSS selectors).
    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// First hint matching at least one element, as a locator for its first match.
    pub async fn resolve_container<D: Driver>(
        &self,
        driver: &D,
    ) -> Result<Option<Locator>, AppError> {
        for hint in &self.hints {
            let candidate = Locator::css(hint.as_str());
            if driver.count(&candidate).await? > 0 {
                self.reporter
                    .report(HarvestEvent::ContainerResolved { selector: hint });
                return Ok(Some(candidate.first()));
            }
        }
        self.reporter.report(HarvestEvent::ContainerMissing);
        Ok(None)
    }

    /// Reads every rendered link and appends unseen identifiers in page order.
    /// Returns how many were added.
    pub async fn extract<D: Driver>(
        &self,
        driver: &D,
        set: &mut IdentifierSet,
    ) -> Result<usize, AppError> {
        let hrefs = driver.attribute_all(&self.links, "href").await?;
        let found = hrefs
            .iter()
            .flatten()
            .filter_map(|href| identifier_from_href(href));
        Ok(set.extend_new(found))
    }

    /// Runs extraction and scroll rounds until convergence or the round cap.
    pub async fn collect<D: Driver>(&self, driver: &D) -> Result<Harvest, AppError> {
        self.config.validate()?;

        let mut target = match self.resolve_container(driver).await? {
            Some(container) => ScrollTarget::Container(container),
            None => ScrollTarget::Page,
        };

        let mut identifiers = IdentifierSet::new();
        self.extract(driver, &mut identifiers).await?;

        let mut last_count = identifiers.len();
        let mut stable_rounds = 0;
        let mut rounds = 0;
        let mut reason = StopReason::RoundCap;

        while rounds < self.config.max_rounds {
            rounds += 1;
            target = self.advance(driver, target, rounds).await?;
            driver.settle(self.config.settle).await;

            let added = self.extract(driver, &mut identifiers).await?;
            let count = identifiers.len();
            if count == last_count {
                stable_rounds += 1;
            } else {
                stable_rounds = 0;
                last_count = count;
            }

            self.reporter.report(HarvestEvent::RoundCompleted {
                round: rounds,
                total: count,
                added,
                stable_rounds,
            });

            if stable_rounds >= self.config.stable_rounds {
                reason = StopReason::Converged;
                break;
            }
        }

        self.reporter.report(HarvestEvent::CollectionFinished {
            rounds,
            total: identifiers.len(),
            reason,
        });

        Ok(Harvest {
            identifiers,
            rounds,
            reason,
        })
    }

    /// Scrolls once. A container that can no longer be scrolled is dropped
    /// for the rest of the run and the page is scrolled instead.
    async fn advance<D: Driver>(
        &self,
        driver: &D,
        target: ScrollTarget,
        round: u32,
    ) -> Result<ScrollTarget, AppError> {
        if let ScrollTarget::Container(container) = &target {
            match driver.scroll_to_end(container).await? {
                Probe::Ready(()) => return Ok(target),
                Probe::TimedOut | Probe::Absent => {
                    self.reporter
                        .report(HarvestEvent::ContainerDetached { round });
                }
            }
        }
        driver.wheel(self.config.wheel_delta).await?;
        Ok(ScrollTarget::Page)
    }
}
