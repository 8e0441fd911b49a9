//! Test utilities: a scriptable in-memory [`Driver`].
//!
//! Elements are keyed by the rendered form of their [`Locator`]
//! (`locator.to_string()`), so tests describe the page with the same locators
//! the engines build. All state lives behind `Arc<Mutex<_>>` so a clone kept
//! by the test can inspect what happened after the driver was consumed.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::locator::Locator;
use crate::models::{Probe, UrlPattern};
use crate::traits::Driver;

/// Produces the hrefs revealed by the n-th advance (1-based) of a feed.
pub type FeedFn = Box<dyn FnMut(u32) -> Vec<String> + Send>;

/// Simulated infinite-scroll list.
struct Feed {
    links: String,
    next_batch: FeedFn,
    revealed: Vec<String>,
    advances: u32,
}

/// What clicking an element does.
#[derive(Clone, Default)]
struct ClickEffect {
    /// `None` = unlimited; each click decrements, the element vanishes at 0.
    remaining: Option<usize>,
    navigate_to: Option<String>,
}

#[derive(Default)]
struct MockState {
    url: String,
    counts: HashMap<String, usize>,
    visible: HashSet<String>,
    texts: HashMap<String, String>,
    attributes: HashMap<(String, String), Vec<Option<String>>>,
    clicks: HashMap<String, ClickEffect>,
    failing_shots: HashSet<String>,
    feed: Option<Feed>,
    detach_after: Option<u32>,
    scroll_calls: u32,
    actions: Vec<String>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A visible element (or `count` of them) matching `locator`.
    pub fn with_element(self, locator: &Locator, count: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let key = locator.to_string();
            state.counts.insert(key.clone(), count);
            if count > 0 {
                state.visible.insert(key);
            }
        }
        self
    }

    /// Present in the DOM but never visible.
    pub fn with_hidden_element(self, locator: &Locator) -> Self {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(locator.to_string(), 1);
        self
    }

    pub fn with_text(self, locator: &Locator, text: &str) -> Self {
        let this = self.with_element(locator, 1);
        this.state
            .lock()
            .unwrap()
            .texts
            .insert(locator.to_string(), text.to_string());
        this
    }

    pub fn with_attributes(self, locator: &Locator, name: &str, values: &[&str]) -> Self {
        self.state.lock().unwrap().attributes.insert(
            (locator.to_string(), name.to_string()),
            values.iter().map(|v| Some(v.to_string())).collect(),
        );
        self
    }

    /// Clickable element that disappears after `times` clicks.
    pub fn with_clickable(self, locator: &Locator, times: usize) -> Self {
        let this = self.with_element(locator, 1);
        this.state.lock().unwrap().clicks.insert(
            locator.to_string(),
            ClickEffect {
                remaining: Some(times),
                navigate_to: None,
            },
        );
        this
    }

    /// Clickable element that changes the page URL when clicked.
    pub fn with_navigation_on_click(self, locator: &Locator, url: &str) -> Self {
        let this = self.with_element(locator, 1);
        this.state.lock().unwrap().clicks.insert(
            locator.to_string(),
            ClickEffect {
                remaining: None,
                navigate_to: Some(url.to_string()),
            },
        );
        this
    }

    pub fn with_failing_screenshot(self, locator: &Locator) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_shots
            .insert(locator.to_string());
        self
    }

    /// Infinite-scroll feed whose `href`s are read through `links`.
    /// `next_batch(n)` yields the hrefs rendered by the n-th advance.
    pub fn with_feed(self, links: &Locator, initial: &[&str], next_batch: FeedFn) -> Self {
        self.state.lock().unwrap().feed = Some(Feed {
            links: links.to_string(),
            next_batch,
            revealed: initial.iter().map(|s| s.to_string()).collect(),
            advances: 0,
        });
        self
    }

    /// Scroll container reports itself absent after `n` successful scrolls.
    pub fn detach_container_after(self, n: u32) -> Self {
        self.state.lock().unwrap().detach_after = Some(n);
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn count_actions(&self, prefix: &str) -> usize {
        self.actions()
            .iter()
            .filter(|a| a.starts_with(prefix))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn feed_advances(&self) -> u32 {
        self.state
            .lock()
            .unwrap()
            .feed
            .as_ref()
            .map(|f| f.advances)
            .unwrap_or(0)
    }

    fn record(&self, action: String) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(AppError::Driver(format!("used after close: {action}")));
        }
        state.actions.push(action);
        Ok(())
    }

    fn advance_feed(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(feed) = state.feed.as_mut() {
            feed.advances += 1;
            let batch = (feed.next_batch)(feed.advances);
            feed.revealed.extend(batch);
        }
    }

    fn visible(&self, locator: &Locator) -> bool {
        let state = self.state.lock().unwrap();
        let key = locator.to_string();
        state.visible.contains(&key) && state.counts.get(&key).copied().unwrap_or(0) > 0
    }

    fn present(&self, locator: &Locator) -> bool {
        let state = self.state.lock().unwrap();
        state.counts.get(&locator.to_string()).copied().unwrap_or(0) > 0
    }

    /// Absent if nothing matches, timed out if matched but not visible.
    fn probe_visible(&self, locator: &Locator) -> Probe<()> {
        if self.visible(locator) {
            Probe::Ready(())
        } else if self.present(locator) {
            Probe::TimedOut
        } else {
            Probe::Absent
        }
    }
}

impl Driver for MockDriver {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.record(format!("goto {url}"))?;
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AppError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn count(&self, locator: &Locator) -> Result<usize, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.counts.get(&locator.to_string()).copied().unwrap_or(0))
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        self.record(format!("wait {locator}"))?;
        Ok(self.probe_visible(locator))
    }

    async fn click(&self, locator: &Locator, _timeout: Duration) -> Result<Probe<()>, AppError> {
        let probe = self.probe_visible(locator);
        if !probe.is_ready() {
            return Ok(probe);
        }
        self.record(format!("click {locator}"))?;

        let mut state = self.state.lock().unwrap();
        let key = locator.to_string();
        if let Some(effect) = state.clicks.get_mut(&key) {
            let navigate_to = effect.navigate_to.clone();
            let exhausted = match effect.remaining.as_mut() {
                Some(remaining) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => false,
            };
            if exhausted {
                state.counts.insert(key.clone(), 0);
                state.visible.remove(&key);
            }
            if let Some(url) = navigate_to {
                state.url = url;
            }
        }
        Ok(Probe::Ready(()))
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        _timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        let probe = self.probe_visible(locator);
        if probe.is_ready() {
            self.record(format!("fill {locator} {}", value.len()))?;
        }
        Ok(probe)
    }

    async fn inner_text(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<Probe<String>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(match state.texts.get(&locator.to_string()) {
            Some(text) => Probe::Ready(text.clone()),
            None => Probe::TimedOut,
        })
    }

    async fn attribute_all(
        &self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, AppError> {
        let state = self.state.lock().unwrap();
        let key = locator.to_string();
        if let Some(feed) = state.feed.as_ref().filter(|f| f.links == key && name == "href") {
            return Ok(feed.revealed.iter().cloned().map(Some).collect());
        }
        Ok(state
            .attributes
            .get(&(key, name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn scroll_to_end(&self, locator: &Locator) -> Result<Probe<()>, AppError> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(limit) = state.detach_after {
                if state.scroll_calls >= limit {
                    return Ok(Probe::Absent);
                }
            }
            state.scroll_calls += 1;
        }
        self.record(format!("scroll {locator}"))?;
        self.advance_feed();
        Ok(Probe::Ready(()))
    }

    async fn wheel(&self, delta_y: f64) -> Result<(), AppError> {
        self.record(format!("wheel {delta_y}"))?;
        self.advance_feed();
        Ok(())
    }

    async fn screenshot(
        &self,
        locator: &Locator,
        path: &Path,
        _timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        if self
            .state
            .lock()
            .unwrap()
            .failing_shots
            .contains(&locator.to_string())
        {
            return Ok(Probe::TimedOut);
        }
        self.record(format!("screenshot {locator}"))?;
        std::fs::write(path, b"\x89PNG")?;
        Ok(Probe::Ready(()))
    }

    async fn wait_for_url(
        &self,
        pattern: &UrlPattern,
        _timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        self.record(format!("wait_for_url {pattern}"))?;
        let url = self.state.lock().unwrap().url.clone();
        Ok(if pattern.matches(&url) {
            Probe::Ready(())
        } else {
            Probe::TimedOut
        })
    }

    async fn settle(&self, duration: Duration) {
        let _ = self.record(format!("settle {}ms", duration.as_millis()));
    }

    async fn close(self) -> Result<(), AppError> {
        self.record("close".into())?;
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
