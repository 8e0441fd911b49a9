//! Per-card image capture from a feed page.
//!
//! Every card is handled on its own: a card without a readable label or a
//! media element is skipped, a failed capture is recorded, and the batch
//! always runs to the end.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::events::{HarvestEvent, HarvestReporter, TracingReporter};
use crate::locator::Locator;
use crate::models::Probe;
use crate::output::{DEFAULT_DATA_DIR, images_dir};
use crate::traits::Driver;
use crate::util::sanitize;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// One match per card.
    pub cards: Locator,
    /// Label element inside a card (first match).
    pub label: String,
    /// Preferred media element inside a card.
    pub primary_media: String,
    /// Used when no primary media element exists.
    pub fallback_media: String,
    /// Bound on the first card appearing.
    pub appear_timeout: Duration,
    pub label_timeout: Duration,
    pub media_timeout: Duration,
    pub capture_timeout: Duration,
    /// Root of the per-label output directories.
    pub base_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cards: Locator::css("article"),
            label: "a[role=\"link\"] span".into(),
            primary_media: "div._aagw".into(),
            fallback_media: "img".into(),
            appear_timeout: Duration::from_secs(20),
            label_timeout: Duration::from_secs(5),
            media_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(5),
            base_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl CaptureConfig {
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The label could not be read in time.
    NoLabel,
    /// The label was blank after trimming.
    EmptyLabel,
    /// Neither media selector produced a visible element.
    NoMedia,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CardStatus {
    Saved { path: PathBuf },
    Skipped { reason: SkipReason },
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardOutcome {
    pub index: usize,
    pub label: Option<String>,
    #[serde(flatten)]
    pub status: CardStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureReport {
    /// Cards present when processing started.
    pub found: usize,
    pub outcomes: Vec<CardOutcome>,
}

impl CaptureReport {
    pub fn saved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CardStatus::Saved { .. }))
            .count()
    }
}

/// Hands out `<UTC %Y%m%d%H%M%S%6f>.png` names that strictly increase, even
/// when the clock does not advance between two captures.
#[derive(Debug, Default)]
pub struct ArtifactNamer {
    last: Option<DateTime<Utc>>,
}

impl ArtifactNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_name(&mut self, now: DateTime<Utc>) -> String {
        let stamp = match self.last {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        format!("{}.png", stamp.format("%Y%m%d%H%M%S%6f"))
    }
}

/// Walks every card on the page and saves a snapshot of its media.
pub struct CapturePipeline<R = TracingReporter> {
    config: CaptureConfig,
    reporter: R,
}

impl CapturePipeline<TracingReporter> {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            reporter: TracingReporter,
        }
    }
}

impl<R: HarvestReporter> CapturePipeline<R> {
    pub fn with_reporter<R2: HarvestReporter>(self, reporter: R2) -> CapturePipeline<R2> {
        CapturePipeline {
            config: self.config,
            reporter,
        }
    }

    pub async fn run<D: Driver>(&self, driver: &D) -> Result<CaptureReport, AppError> {
        let appeared = driver
            .wait_visible(&self.config.cards.clone().first(), self.config.appear_timeout)
            .await?;
        if !appeared.is_ready() {
            self.reporter.report(HarvestEvent::NoCards);
            return Ok(CaptureReport::default());
        }

        let found = driver.count(&self.config.cards).await?;
        self.reporter.report(HarvestEvent::CardsFound { count: found });

        let mut namer = ArtifactNamer::new();
        let mut outcomes = Vec::with_capacity(found);
        for index in 0..found {
            let outcome = self.capture_card(driver, index, &mut namer).await?;
            outcomes.push(outcome);
        }

        Ok(CaptureReport { found, outcomes })
    }

    async fn capture_card<D: Driver>(
        &self,
        driver: &D,
        index: usize,
        namer: &mut ArtifactNamer,
    ) -> Result<CardOutcome, AppError> {
        let card = self.config.cards.clone().nth(index);

        let label_locator = card.clone().locate(self.config.label.as_str()).first();
        let label = match driver
            .inner_text(&label_locator, self.config.label_timeout)
            .await?
        {
            Probe::Ready(text) => text.trim().to_string(),
            Probe::TimedOut | Probe::Absent => {
                return Ok(self.skipped(index, None, SkipReason::NoLabel));
            }
        };
        if label.is_empty() {
            return Ok(self.skipped(index, None, SkipReason::EmptyLabel));
        }

        let Some(media) = self.locate_media(driver, &card).await? else {
            return Ok(self.skipped(index, Some(label), SkipReason::NoMedia));
        };

        let dir = images_dir(&self.config.base_dir, &sanitize(&label));
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(namer.next_name(Utc::now()));

        let status = match driver
            .screenshot(&media, &path, self.config.capture_timeout)
            .await?
        {
            Probe::Ready(()) => {
                self.report_saved(index, &label, &path);
                CardStatus::Saved { path }
            }
            Probe::TimedOut | Probe::Absent => {
                self.reporter.report(HarvestEvent::CardFailed {
                    index,
                    label: &label,
                });
                CardStatus::Failed
            }
        };

        Ok(CardOutcome {
            index,
            label: Some(label),
            status,
        })
    }

    /// Primary media if the card has any, otherwise the fallback; `None`
    /// if the chosen element never becomes visible.
    async fn locate_media<D: Driver>(
        &self,
        driver: &D,
        card: &Locator,
    ) -> Result<Option<Locator>, AppError> {
        let primary = card.clone().locate(self.config.primary_media.as_str());
        let media = if driver.count(&primary).await? > 0 {
            primary.first()
        } else {
            card.clone()
                .locate(self.config.fallback_media.as_str())
                .first()
        };
        let probe = driver
            .wait_visible(&media, self.config.media_timeout)
            .await?;
        Ok(probe.ready().map(|()| media))
    }

    fn skipped(&self, index: usize, label: Option<String>, reason: SkipReason) -> CardOutcome {
        self.reporter.report(HarvestEvent::CardSkipped {
            index,
            label: label.as_deref(),
            reason,
        });
        CardOutcome {
            index,
            label,
            status: CardStatus::Skipped { reason },
        }
    }

    fn report_saved(&self, index: usize, label: &str, path: &Path) {
        self.reporter
            .report(HarvestEvent::CardSaved { index, label, path });
    }
}

/// Captures every card on the current page, logging through `tracing`.
pub async fn capture_cards<D: Driver>(
    driver: &D,
    config: CaptureConfig,
) -> Result<CaptureReport, AppError> {
    CapturePipeline::new(config).run(driver).await
}
