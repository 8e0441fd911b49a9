//! Session acquisition: log in, get past interstitial prompts, and hand the
//! page to exactly one consumer scope that always releases the browser.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use url::Url;

use crate::credentials::Credentials;
use crate::error::AppError;
use crate::locator::Locator;
use crate::models::{AuthState, Probe, UrlPattern};
use crate::selector::{DEFAULT_PROMPT_LABELS, StrategySet};
use crate::traits::Driver;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub login_url: Url,
    /// URLs counted as "logged in". Must not match the login surface.
    pub authenticated: UrlPattern,
    pub identity_input: Locator,
    pub secret_input: Locator,
    pub submit: Locator,
    /// Bound on the login form becoming interactable.
    pub form_timeout: Duration,
    /// Bound on each post-submit wait for the authenticated URL.
    pub navigation_timeout: Duration,
    pub prompt_cycles: u32,
    pub prompt_passes: u32,
    pub prompt_labels: Vec<String>,
    /// Bound on each selector strategy while dismissing a prompt.
    pub prompt_timeout: Duration,
    /// Pause after reaching the authenticated area.
    pub landing_settle: Duration,
    /// Pause before the browser is terminated, for in-flight requests.
    pub drain: Duration,
}

impl SessionConfig {
    /// Defaults for a site whose login form lives at `<site>/accounts/login/`.
    pub fn new(site_url: &str) -> Result<Self, AppError> {
        let site = Url::parse(site_url)
            .map_err(|e| AppError::Config(format!("Invalid site URL '{site_url}': {e}")))?;
        let login_url = site
            .join("accounts/login/")
            .map_err(|e| AppError::Config(format!("Invalid login URL: {e}")))?;
        let authenticated = UrlPattern::new(site.as_str())?.excluding(login_url.path());

        Ok(Self {
            login_url,
            authenticated,
            identity_input: Locator::css("input[name=\"username\"]").first(),
            secret_input: Locator::css("input[name=\"password\"]").first(),
            submit: Locator::css("button[type=\"submit\"]").first(),
            form_timeout: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(5),
            prompt_cycles: 3,
            prompt_passes: 3,
            prompt_labels: DEFAULT_PROMPT_LABELS.iter().map(|s| s.to_string()).collect(),
            prompt_timeout: Duration::from_secs(5),
            landing_settle: Duration::from_secs(1),
            drain: Duration::from_secs(5),
        })
    }

    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }
}

/// States of the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Start,
    FormSubmitted,
    /// Zero-based prompt-dismissal cycle.
    PromptCycle(u32),
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginReport {
    pub state: AuthState,
    /// Prompt cycles entered before reaching a terminal state.
    pub cycles: u32,
    pub prompts_dismissed: u32,
}

/// Runs the login state machine on `driver`.
///
/// Fails only if the login form never becomes interactable. Not reaching
/// the authenticated area is reported as [`AuthState::Unauthenticated`].
pub async fn login<D: Driver>(
    driver: &D,
    credentials: &Credentials,
    config: &SessionConfig,
    strategies: &StrategySet,
) -> Result<LoginReport, AppError> {
    let mut state = LoginState::Start;
    let mut cycles = 0;
    let mut prompts_dismissed = 0;

    let auth = loop {
        tracing::debug!(?state, "Login state");
        state = match state {
            LoginState::Start => {
                driver.goto(config.login_url.as_str()).await?;
                match driver
                    .wait_visible(&config.identity_input, config.form_timeout)
                    .await?
                {
                    Probe::Ready(()) => LoginState::FormSubmitted,
                    Probe::TimedOut | Probe::Absent => {
                        return Err(AppError::LoginSurface(format!(
                            "{} did not appear at {} within {:?}",
                            config.identity_input, config.login_url, config.form_timeout
                        )));
                    }
                }
            }
            LoginState::FormSubmitted => {
                submit_form(driver, credentials, config).await?;
                LoginState::PromptCycle(0)
            }
            LoginState::PromptCycle(k) if k >= config.prompt_cycles => LoginState::Unauthenticated,
            LoginState::PromptCycle(k) => {
                cycles = k + 1;
                prompts_dismissed += strategies
                    .dismiss_prompts(
                        driver,
                        &config.prompt_labels,
                        config.prompt_passes,
                        config.prompt_timeout,
                    )
                    .await?;

                if config.authenticated.matches(&driver.current_url().await?) {
                    LoginState::Authenticated
                } else {
                    match driver
                        .wait_for_url(&config.authenticated, config.navigation_timeout)
                        .await?
                    {
                        Probe::Ready(()) => LoginState::Authenticated,
                        Probe::TimedOut | Probe::Absent => LoginState::PromptCycle(k + 1),
                    }
                }
            }
            LoginState::Authenticated => break AuthState::Authenticated,
            LoginState::Unauthenticated => break AuthState::Unauthenticated,
        };
    };

    match auth {
        AuthState::Authenticated => tracing::info!(cycles, "Reached the authenticated area"),
        AuthState::Unauthenticated => tracing::warn!(
            cycles,
            pattern = %config.authenticated,
            "Login likely failed; authenticated area not reached"
        ),
    }

    // Prompts can show up after the URL has already changed.
    prompts_dismissed += strategies
        .dismiss_prompts(
            driver,
            &config.prompt_labels,
            config.prompt_passes,
            config.prompt_timeout,
        )
        .await?;
    if auth == AuthState::Authenticated {
        driver.settle(config.landing_settle).await;
    }

    Ok(LoginReport {
        state: auth,
        cycles,
        prompts_dismissed,
    })
}

async fn submit_form<D: Driver>(
    driver: &D,
    credentials: &Credentials,
    config: &SessionConfig,
) -> Result<(), AppError> {
    let steps = [
        (&config.identity_input, Some(credentials.identity())),
        (&config.secret_input, Some(credentials.secret())),
        (&config.submit, None),
    ];
    for (locator, value) in steps {
        let probe = match value {
            Some(value) => driver.fill(locator, value, config.form_timeout).await?,
            None => driver.click(locator, config.form_timeout).await?,
        };
        if !probe.is_ready() {
            return Err(AppError::LoginSurface(format!(
                "{locator} was not interactable within {:?}",
                config.form_timeout
            )));
        }
    }
    Ok(())
}

/// An authenticated (or best-effort) browser page.
///
/// The page is only reachable inside [`Session::run`], which consumes the
/// session and releases the browser on every exit path.
pub struct Session<D: Driver> {
    driver: D,
    report: LoginReport,
    drain: Duration,
}

impl<D: Driver> Session<D> {
    /// Logs in with `driver`. If login fails, the browser is released before
    /// the error is returned.
    pub async fn acquire(
        driver: D,
        credentials: &Credentials,
        config: &SessionConfig,
    ) -> Result<Self, AppError> {
        Self::acquire_with(driver, credentials, config, &StrategySet::default()).await
    }

    pub async fn acquire_with(
        driver: D,
        credentials: &Credentials,
        config: &SessionConfig,
        strategies: &StrategySet,
    ) -> Result<Self, AppError> {
        match login(&driver, credentials, config, strategies).await {
            Ok(report) => Ok(Self {
                driver,
                report,
                drain: config.drain,
            }),
            Err(e) => {
                if e.is_setup_error() {
                    tracing::error!("Login cannot proceed: {e}");
                } else {
                    tracing::warn!("Login aborted: {e}");
                }
                release(driver, config.drain).await;
                Err(e)
            }
        }
    }

    pub fn report(&self) -> &LoginReport {
        &self.report
    }

    pub fn state(&self) -> AuthState {
        self.report.state
    }

    /// Hands the page to `f`, then releases the browser whether `f`
    /// returned `Ok`, returned `Err`, or panicked.
    pub async fn run<T, F>(self, f: F) -> Result<T, AppError>
    where
        F: for<'a> FnOnce(&'a D) -> BoxFuture<'a, Result<T, AppError>>,
    {
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| f(&self.driver))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        release(self.driver, self.drain).await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

async fn release<D: Driver>(driver: D, drain: Duration) {
    driver.settle(drain).await;
    match driver.close().await {
        Ok(()) => tracing::debug!("Browser released"),
        Err(e) => tracing::warn!("Failed to close browser: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorStrategy;
    use crate::testutil::MockDriver;

    const HOME: &str = "https://www.instagram.com/";

    fn config() -> SessionConfig {
        SessionConfig::new(HOME)
            .unwrap()
            .with_prompt_timeout(Duration::from_millis(10))
    }

    fn credentials() -> Credentials {
        Credentials::new("me", "secret")
    }

    /// Login page with a form; `redirect` decides whether submitting lands home.
    fn login_page(redirect: bool) -> MockDriver {
        let config = config();
        let driver = MockDriver::new()
            .with_element(&config.identity_input, 1)
            .with_element(&config.secret_input, 1);
        if redirect {
            driver.with_navigation_on_click(&config.submit, HOME)
        } else {
            driver.with_clickable(&config.submit, 1)
        }
    }

    #[test]
    fn default_pattern_excludes_the_login_surface() {
        let config = config();
        assert_eq!(
            config.login_url.as_str(),
            "https://www.instagram.com/accounts/login/"
        );
        assert!(!config.authenticated.matches(config.login_url.as_str()));
        assert!(config.authenticated.matches(HOME));
        assert_eq!(config.prompt_timeout, Duration::from_millis(10));
        assert_eq!(SessionConfig::new(HOME).unwrap().prompt_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn valid_login_reaches_authenticated_in_one_cycle() {
        let driver = login_page(true);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.report().cycles, 1);
        assert_eq!(driver.count_actions("fill"), 2);
        assert_eq!(driver.count_actions("wait_for_url"), 0);
        assert_eq!(driver.count_actions("settle 1000ms"), 1);
    }

    #[tokio::test]
    async fn unconfirmed_login_is_reported_and_still_yields_a_page() {
        // Degraded path: a real login failure is indistinguishable from a
        // slow redirect here, and the caller still gets the page.
        let driver = login_page(false);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert_eq!(session.report().cycles, 3);
        assert_eq!(driver.count_actions("wait_for_url"), 3);

        let url = session
            .run(|page| Box::pin(async move { page.current_url().await }))
            .await
            .unwrap();
        assert_eq!(url, "https://www.instagram.com/accounts/login/");
    }

    #[tokio::test]
    async fn missing_login_form_is_fatal_and_releases_the_browser() {
        let driver = MockDriver::new();
        let result = Session::acquire(driver.clone(), &credentials(), &config()).await;

        assert!(matches!(result, Err(AppError::LoginSurface(_))));
        assert!(driver.is_closed());
    }

    #[tokio::test]
    async fn prompts_are_dismissed_each_cycle_and_once_more_at_the_end() {
        let prompt = SelectorStrategy::ButtonText.locator("Not now");
        let driver = login_page(false).with_clickable(&prompt, 100);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        // 3 cycles x 3 passes, then one terminal pass of 3.
        assert_eq!(session.report().prompts_dismissed, 12);
    }

    #[tokio::test]
    async fn prompt_shown_after_submit_is_dismissed() {
        let prompt = SelectorStrategy::ButtonText.locator("Not now");
        let driver = login_page(true).with_clickable(&prompt, 1);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.report().prompts_dismissed, 1);
    }

    #[tokio::test]
    async fn run_releases_after_drain_on_success() {
        let driver = login_page(true);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        let value = session
            .run(|_| Box::pin(async { Ok(42) }))
            .await
            .unwrap();
        assert_eq!(value, 42);

        let actions = driver.actions();
        let n = actions.len();
        assert_eq!(actions[n - 2], "settle 5000ms");
        assert_eq!(actions[n - 1], "close");
        assert!(driver.is_closed());
    }

    #[tokio::test]
    async fn run_releases_when_the_consumer_fails() {
        let driver = login_page(true);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        let err = session
            .run(|_| Box::pin(async { Err::<(), _>(AppError::Driver("boom".into())) }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Driver(_)));
        assert!(driver.is_closed());
    }

    #[tokio::test]
    async fn run_releases_when_the_consumer_panics() {
        let driver = login_page(true);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        let outcome = AssertUnwindSafe(session.run(|_| {
            Box::pin(async {
                let blow_up = true;
                if blow_up {
                    panic!("consumer blew up");
                }
                Ok::<(), AppError>(())
            })
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert!(driver.is_closed());
    }

    #[tokio::test]
    async fn run_releases_when_the_consumer_panics_before_awaiting() {
        let driver = login_page(true);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();

        let outcome = AssertUnwindSafe(session.run(|_| {
            let blow_up = true;
            if blow_up {
                panic!("consumer blew up while building its future");
            }
            Box::pin(async { Ok::<(), AppError>(()) })
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        let actions = driver.actions();
        let n = actions.len();
        assert_eq!(actions[n - 2], "settle 5000ms");
        assert_eq!(actions[n - 1], "close");
        assert!(driver.is_closed());
    }

    #[tokio::test]
    async fn page_is_unusable_after_release() {
        let driver = login_page(true);
        let session = Session::acquire(driver.clone(), &credentials(), &config())
            .await
            .unwrap();
        session.run(|_| Box::pin(async { Ok(()) })).await.unwrap();

        assert!(driver.goto(HOME).await.is_err());
    }
}
