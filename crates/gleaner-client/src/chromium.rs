use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use gleaner_core::error::AppError;
use gleaner_core::locator::Locator;
use gleaner_core::models::{Probe, UrlPattern};
use gleaner_core::traits::Driver;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Attribute used to hand an element resolved in page script over to a
/// native CDP element handle.
const REF_ATTRIBUTE: &str = "data-gleaner-ref";

/// Evaluates a serialized [`Locator`] against the live DOM.
///
/// Steps run left to right; each one queries inside every element kept by
/// the previous step, de-duplicates, then applies its `nth` narrowing.
const RESOLVER_JS: &str = r#"
const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
const visible = (el) => {
  if (!el.isConnected) return false;
  const style = window.getComputedStyle(el);
  return style.visibility !== 'hidden' && style.display !== 'none' && el.getClientRects().length > 0;
};
const query = (scope, q) => {
  switch (q.kind) {
    case 'css':
      return Array.from(scope.querySelectorAll(q.css));
    case 'text': {
      const want = q.exact ? norm(q.text) : norm(q.text).toLowerCase();
      return Array.from(scope.querySelectorAll(q.css)).filter((el) => {
        const got = norm(el.innerText ?? el.textContent);
        return q.exact ? got === want : got.toLowerCase().includes(want);
      });
    }
    case 'xpath': {
      const out = [];
      try {
        const snap = document.evaluate(q.xpath, scope, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
        for (let i = 0; i < snap.snapshotLength; i++) {
          const node = snap.snapshotItem(i);
          if (node instanceof Element) out.push(node);
        }
      } catch (_) {}
      return out;
    }
    default:
      return [];
  }
};
const resolve = (loc) => {
  let scopes = [document];
  for (const step of loc.steps) {
    const seen = new Set();
    let next = [];
    for (const scope of scopes) {
      for (const el of query(scope, step.query)) {
        if (!seen.has(el)) {
          seen.add(el);
          next.push(el);
        }
      }
    }
    if (step.nth !== null && step.nth !== undefined) {
      next = next.length > step.nth ? [next[step.nth]] : [];
    }
    scopes = next;
  }
  return scopes;
};
"#;

const COUNT_BODY: &str = "return { v: els.length };";

const STATE_BODY: &str = "const el = els[0];
if (!el) return { v: 'absent' };
return { v: visible(el) ? 'visible' : 'hidden' };";

const TEXT_BODY: &str = "const el = els[0];
if (!el) return { v: null };
return { v: el.innerText ?? el.textContent ?? '' };";

const SCROLL_END_BODY: &str = "const el = els[0];
if (!el || !el.isConnected) return { v: false };
el.scrollTop = el.scrollHeight;
return { v: true };";

/// Every script returns `{ v: ... }` so `null` results survive the trip
/// through `Runtime.evaluate`.
#[derive(Deserialize)]
struct Reply<T> {
    v: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ElementState {
    Absent,
    Hidden,
    Visible,
}

/// Launch options for [`ChromiumDriver`].
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Pause inserted before every page action.
    pub slow_mo: Duration,
    /// Explicit browser binary; otherwise `CHROME_BIN` and well-known
    /// install locations are tried before chromiumoxide's own lookup.
    pub chrome_bin: Option<PathBuf>,
    pub window_size: (u32, u32),
    /// Interval between checks while waiting on the page.
    pub poll_interval: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            slow_mo: Duration::from_millis(200),
            chrome_bin: None,
            window_size: (1280, 900),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl BrowserOptions {
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_slow_mo(mut self, slow_mo: Duration) -> Self {
        self.slow_mo = slow_mo;
        self
    }

    pub fn with_chrome_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.chrome_bin = Some(bin.into());
        self
    }

    fn to_config(&self) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(self.window_size.0, self.window_size.1);

        builder = if self.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };

        if let Some(bin) = self.chrome_bin.clone().or_else(find_chrome_binary) {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::Browser(format!("Browser config error: {e}")))
    }
}

/// Locates a Chrome/Chromium binary.
///
/// `CHROME_BIN` wins when it points at an existing file. The snap wrapper
/// at `/snap/bin/chromium` rejects standard Chrome flags, so the real binary
/// inside the snap is tried before system paths. `None` leaves the lookup
/// to chromiumoxide.
pub fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// A single Chromium page driven over the Chrome DevTools Protocol.
///
/// Locators are serialized to JSON and resolved by page script. Elements
/// that need a native action (click, typing, screenshots) are tagged with a
/// one-off `data-gleaner-ref` attribute and then fetched as CDP elements.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    slow_mo: Duration,
    poll_interval: Duration,
    refs: AtomicU64,
}

impl ChromiumDriver {
    /// Launches the browser and opens one blank page.
    pub async fn launch(options: &BrowserOptions) -> Result<Self, AppError> {
        let config = options.to_config()?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser CDP handler error: {e}");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(AppError::Browser(format!("Failed to open page: {e}")));
            }
        };

        tracing::info!(headless = options.headless, "Browser launched");
        Ok(Self {
            browser,
            page,
            handler,
            slow_mo: options.slow_mo,
            poll_interval: options.poll_interval,
            refs: AtomicU64::new(0),
        })
    }

    async fn pace(&self) {
        if !self.slow_mo.is_zero() {
            tokio::time::sleep(self.slow_mo).await;
        }
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, AppError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| AppError::Driver(format!("Script evaluation failed: {e}")))?;
        let reply: Reply<T> = result
            .into_value()
            .map_err(|e| AppError::Driver(format!("Unexpected script result: {e}")))?;
        Ok(reply.v)
    }

    /// Evaluation inside a wait loop. A page that is navigating loses its
    /// execution context for a moment; that reads as "not ready yet" (`None`).
    /// Only a lost browser connection is an error.
    async fn poll_eval<T: DeserializeOwned>(
        &self,
        script: String,
    ) -> Result<Option<T>, AppError> {
        let result = match self.page.evaluate(script).await {
            Ok(result) => result,
            Err(e) => return transient(e, "Script evaluation failed"),
        };
        match result.into_value::<Reply<T>>() {
            Ok(reply) => Ok(Some(reply.v)),
            Err(e) => {
                tracing::debug!("Unexpected script result while polling: {e}");
                Ok(None)
            }
        }
    }

    /// Polls until the first match is visible or `timeout` elapses.
    async fn await_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        let deadline = Instant::now() + timeout;
        let script = locator_script(locator, STATE_BODY)?;
        loop {
            let state: Option<ElementState> = self.poll_eval(script.clone()).await?;
            if state == Some(ElementState::Visible) {
                return Ok(Probe::Ready(()));
            }
            if Instant::now() >= deadline {
                return Ok(expired(state));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Waits for the first match to be visible, tags it, and returns it as a
    /// CDP element.
    async fn acquire(
        &self,
        locator: &Locator,
        timeout: Duration,
        clear_value: bool,
    ) -> Result<Probe<Element>, AppError> {
        match self.await_visible(locator, timeout).await? {
            Probe::Ready(()) => {}
            Probe::TimedOut => return Ok(Probe::TimedOut),
            Probe::Absent => return Ok(Probe::Absent),
        }

        let token = format!("g{}", self.refs.fetch_add(1, Ordering::Relaxed));
        let marked: Option<bool> = self
            .poll_eval(locator_script(locator, &mark_body(&token, clear_value))?)
            .await?;
        if marked != Some(true) {
            return Ok(Probe::TimedOut);
        }

        match self.page.find_element(ref_selector(&token)).await {
            Ok(element) => Ok(Probe::Ready(element)),
            Err(e) => {
                tracing::debug!(%locator, "Tagged element vanished: {e}");
                Ok(Probe::TimedOut)
            }
        }
    }
}

/// Outcome of a visibility wait whose deadline passed with `last` as the
/// final observed state. An unreadable page counts as still loading.
fn expired(last: Option<ElementState>) -> Probe<()> {
    match last {
        Some(ElementState::Absent) => Probe::Absent,
        _ => Probe::TimedOut,
    }
}

/// The browser process or its DevTools socket is gone.
fn connection_lost(error: &CdpError) -> bool {
    matches!(
        error,
        CdpError::Ws(_) | CdpError::Io(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
    )
}

/// Swallows a failure seen while polling unless the connection is gone.
fn transient<T>(error: CdpError, what: &str) -> Result<Option<T>, AppError> {
    if connection_lost(&error) {
        return Err(AppError::Driver(format!("{what}: {error}")));
    }
    tracing::debug!("{what} while polling: {error}");
    Ok(None)
}

fn locator_script(locator: &Locator, body: &str) -> Result<String, AppError> {
    let json = serde_json::to_string(locator)?;
    Ok(format!(
        "(() => {{\n{RESOLVER_JS}\nconst els = resolve({json});\n{body}\n}})()"
    ))
}

fn mark_body(token: &str, clear_value: bool) -> String {
    let clear = if clear_value {
        "if ('value' in el) { el.value = ''; el.dispatchEvent(new Event('input', { bubbles: true })); }"
    } else {
        ""
    };
    format!(
        "const el = els[0];
if (!el || !visible(el)) return {{ v: false }};
el.setAttribute('{REF_ATTRIBUTE}', '{token}');
{clear}
return {{ v: true }};"
    )
}

fn ref_selector(token: &str) -> String {
    format!("[{REF_ATTRIBUTE}=\"{token}\"]")
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

impl Driver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.pace().await;
        self.page
            .goto(url)
            .await
            .map_err(|e| AppError::Driver(format!("Failed to navigate to {url}: {e}")))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AppError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| AppError::Driver(format!("Failed to read page URL: {e}")))?
            .unwrap_or_default();
        Ok(url)
    }

    async fn count(&self, locator: &Locator) -> Result<usize, AppError> {
        self.eval(locator_script(locator, COUNT_BODY)?).await
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        self.await_visible(locator, timeout).await
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<Probe<()>, AppError> {
        self.pace().await;
        let element = match self.acquire(locator, timeout, false).await? {
            Probe::Ready(element) => element,
            Probe::TimedOut => return Ok(Probe::TimedOut),
            Probe::Absent => return Ok(Probe::Absent),
        };
        match element.click().await {
            Ok(_) => Ok(Probe::Ready(())),
            Err(e) => {
                tracing::debug!(%locator, "Click failed: {e}");
                Ok(Probe::TimedOut)
            }
        }
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        self.pace().await;
        let element = match self.acquire(locator, timeout, true).await? {
            Probe::Ready(element) => element,
            Probe::TimedOut => return Ok(Probe::TimedOut),
            Probe::Absent => return Ok(Probe::Absent),
        };
        let typed = async {
            element.click().await?;
            element.type_str(value).await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        }
        .await;
        match typed {
            Ok(()) => Ok(Probe::Ready(())),
            Err(e) => {
                tracing::debug!(%locator, "Typing failed: {e}");
                Ok(Probe::TimedOut)
            }
        }
    }

    async fn inner_text(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Probe<String>, AppError> {
        let deadline = Instant::now() + timeout;
        let script = locator_script(locator, TEXT_BODY)?;
        loop {
            let text: Option<Option<String>> = self.poll_eval(script.clone()).await?;
            if let Some(Some(text)) = text {
                return Ok(Probe::Ready(text));
            }
            if Instant::now() >= deadline {
                return Ok(Probe::TimedOut);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn attribute_all(
        &self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, AppError> {
        let name = serde_json::to_string(name)?;
        let body = format!("return {{ v: els.map((el) => el.getAttribute({name})) }};");
        self.eval(locator_script(locator, &body)?).await
    }

    async fn scroll_to_end(&self, locator: &Locator) -> Result<Probe<()>, AppError> {
        self.pace().await;
        let scrolled: bool = self.eval(locator_script(locator, SCROLL_END_BODY)?).await?;
        Ok(if scrolled {
            Probe::Ready(())
        } else {
            Probe::Absent
        })
    }

    async fn wheel(&self, delta_y: f64) -> Result<(), AppError> {
        self.pace().await;
        let _: bool = self
            .eval(format!("(() => {{ window.scrollBy(0, {delta_y}); return {{ v: true }}; }})()"))
            .await?;
        Ok(())
    }

    async fn screenshot(
        &self,
        locator: &Locator,
        path: &Path,
        timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        self.pace().await;
        let deadline = Instant::now() + timeout;
        let element = match self.acquire(locator, timeout, false).await? {
            Probe::Ready(element) => element,
            Probe::TimedOut => return Ok(Probe::TimedOut),
            Probe::Absent => return Ok(Probe::Absent),
        };

        let shot = tokio::time::timeout(remaining(deadline), async {
            element.scroll_into_view().await?;
            element.screenshot(CaptureScreenshotFormat::Png).await
        })
        .await;

        let bytes = match shot {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::debug!(%locator, "Screenshot failed: {e}");
                return Ok(Probe::TimedOut);
            }
            Err(_) => return Ok(Probe::TimedOut),
        };
        tokio::fs::write(path, bytes).await?;
        Ok(Probe::Ready(()))
    }

    async fn wait_for_url(
        &self,
        pattern: &UrlPattern,
        timeout: Duration,
    ) -> Result<Probe<()>, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            let url = match self.page.url().await {
                Ok(url) => url.unwrap_or_default(),
                Err(e) => transient(e, "Failed to read page URL")?.unwrap_or_default(),
            };
            if pattern.matches(&url) {
                return Ok(Probe::Ready(()));
            }
            if Instant::now() >= deadline {
                tracing::debug!(%url, %pattern, "URL did not match in time");
                return Ok(Probe::TimedOut);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(self) -> Result<(), AppError> {
        let Self {
            mut browser,
            handler,
            ..
        } = self;
        let closed = browser
            .close()
            .await
            .map_err(|e| AppError::Browser(format!("Failed to close browser: {e}")));
        if closed.is_ok() {
            let _ = browser.wait().await;
        }
        handler.abort();
        closed.map(|_| ())
    }
}
