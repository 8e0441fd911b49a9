use thiserror::Error;

/// Application-wide error types for Gleaner.
///
/// Bounded waits that simply run out of time are not errors; they surface as
/// [`crate::models::Probe::TimedOut`]. Everything here aborts the run.
#[derive(Error, Debug)]
pub enum AppError {
    /// Credentials could not be resolved from the environment or the fallback file.
    #[error(
        "Missing credentials: {}. Set them via environment variables or the .env file.",
        keys.join(", ")
    )]
    MissingCredentials { keys: Vec<String> },

    /// The login form never became interactable.
    #[error("Login surface unavailable: {0}")]
    LoginSurface(String),

    /// A page required before harvesting (profile, dialog) could not be reached.
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Launching or talking to the browser process failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// An automation command failed for a reason other than a timeout.
    #[error("Driver error: {0}")]
    Driver(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Returns true for errors caused by the environment or configuration,
    /// which no amount of retrying can fix.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            AppError::MissingCredentials { .. } | AppError::Config(_) | AppError::LoginSurface(_)
        )
    }
}
