use std::path::Path;

use crate::capture::SkipReason;
use crate::collect::StopReason;

/// Progress events emitted by the collection engine and capture pipeline.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    ContainerResolved {
        selector: &'a str,
    },
    ContainerMissing,
    ContainerDetached {
        round: u32,
    },
    RoundCompleted {
        round: u32,
        total: usize,
        added: usize,
        stable_rounds: u32,
    },
    CollectionFinished {
        rounds: u32,
        total: usize,
        reason: StopReason,
    },
    CardsFound {
        count: usize,
    },
    NoCards,
    CardSaved {
        index: usize,
        label: &'a str,
        path: &'a Path,
    },
    CardSkipped {
        index: usize,
        label: Option<&'a str>,
        reason: SkipReason,
    },
    CardFailed {
        index: usize,
        label: &'a str,
    },
}

/// Trait for receiving harvest events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl HarvestReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::ContainerResolved { selector } => {
                tracing::info!(%selector, "Scroll container resolved");
            }
            HarvestEvent::ContainerMissing => {
                tracing::info!("No scroll container matched; scrolling the page");
            }
            HarvestEvent::ContainerDetached { round } => {
                tracing::warn!(round, "Scroll container detached; scrolling the page");
            }
            HarvestEvent::RoundCompleted {
                round,
                total,
                added,
                stable_rounds,
            } => {
                tracing::debug!(round, total, added, stable_rounds, "Round completed");
            }
            HarvestEvent::CollectionFinished {
                rounds,
                total,
                reason,
            } => {
                tracing::info!(rounds, total, ?reason, "Collection finished");
            }
            HarvestEvent::CardsFound { count } => {
                tracing::info!(count, "Found cards on the page");
            }
            HarvestEvent::NoCards => {
                tracing::info!("No cards found to process");
            }
            HarvestEvent::CardSaved { index, label, path } => {
                tracing::info!(index, %label, path = %path.display(), "Saved image");
            }
            HarvestEvent::CardSkipped {
                index,
                label,
                reason,
            } => {
                tracing::info!(index, ?label, ?reason, "Skipping card");
            }
            HarvestEvent::CardFailed { index, label } => {
                tracing::warn!(index, %label, "Failed to capture screenshot");
            }
        }
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl HarvestReporter for NullReporter {}
