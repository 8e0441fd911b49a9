use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::error::AppError;
use crate::locator::Locator;
use crate::models::{Probe, UrlPattern};

/// Drives a single browser page, one action at a time.
///
/// Every method that waits takes an explicit timeout and reports running out
/// of time as [`Probe::TimedOut`]. `Err` is reserved for failures that should
/// abort the run (dead browser, broken protocol connection, I/O).
pub trait Driver: Send + Sync {
    /// Navigates and waits for `DOMContentLoaded`.
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn current_url(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Number of elements currently matching `locator`. Never waits.
    fn count(&self, locator: &Locator) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Waits until the first match of `locator` is visible.
    fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> impl Future<Output = Result<Probe<()>, AppError>> + Send;

    /// Waits for the first match to be visible, then clicks it.
    fn click(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> impl Future<Output = Result<Probe<()>, AppError>> + Send;

    /// Replaces the value of the first matching input with `value`.
    fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Probe<()>, AppError>> + Send;

    /// Rendered text of the first match.
    fn inner_text(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> impl Future<Output = Result<Probe<String>, AppError>> + Send;

    /// Value of attribute `name` on every current match, in document order.
    fn attribute_all(
        &self,
        locator: &Locator,
        name: &str,
    ) -> impl Future<Output = Result<Vec<Option<String>>, AppError>> + Send;

    /// Scrolls the first match to its maximum scroll extent.
    ///
    /// [`Probe::Absent`] means the element is gone (e.g. detached from the DOM).
    fn scroll_to_end(
        &self,
        locator: &Locator,
    ) -> impl Future<Output = Result<Probe<()>, AppError>> + Send;

    /// Generic vertical scroll gesture on the page itself.
    fn wheel(&self, delta_y: f64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Writes a PNG of the first match to `path`.
    fn screenshot(
        &self,
        locator: &Locator,
        path: &Path,
        timeout: Duration,
    ) -> impl Future<Output = Result<Probe<()>, AppError>> + Send;

    /// Waits until the page URL matches `pattern`.
    fn wait_for_url(
        &self,
        pattern: &UrlPattern,
        timeout: Duration,
    ) -> impl Future<Output = Result<Probe<()>, AppError>> + Send;

    /// Lets the page settle (render, reflow, lazy loading) for `duration`.
    fn settle(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Terminates the browser. Called exactly once, by the session scope.
    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send
    where
        Self: Sized;
}
