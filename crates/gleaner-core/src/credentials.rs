use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Login identity and secret, resolved once and passed by reference.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"***")
            .finish()
    }
}

/// Where credentials come from: two environment variables first, then a
/// `KEY=value` file for whichever is still missing.
#[derive(Debug, Clone)]
pub struct CredentialSource {
    pub identity_env: String,
    pub secret_env: String,
    pub identity_key: String,
    pub secret_key: String,
    pub file: Option<PathBuf>,
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self {
            identity_env: "INSTAGRAM_USERNAME".into(),
            secret_env: "PASSWORD".into(),
            identity_key: "USERNAME".into(),
            secret_key: "PASSWORD".into(),
            file: Some(PathBuf::from(".env")),
        }
    }
}

impl CredentialSource {
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn without_file(mut self) -> Self {
        self.file = None;
        self
    }

    /// Resolves against the process environment.
    pub fn resolve(&self) -> Result<Credentials, AppError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolves using `env` as the environment lookup.
    ///
    /// Empty values count as missing. The file is only read when at least
    /// one value is still missing, and only the first occurrence of each key
    /// is used.
    pub fn resolve_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Credentials, AppError> {
        let lookup = |key: &str| env(key).filter(|v| !v.is_empty());
        let mut identity = lookup(&self.identity_env);
        let mut secret = lookup(&self.secret_env);

        if identity.is_none() || secret.is_none() {
            if let Some(path) = self.file.as_deref() {
                for (key, value) in read_env_file(path)? {
                    if value.is_empty() {
                        continue;
                    }
                    if key == self.identity_key && identity.is_none() {
                        identity = Some(value);
                    } else if key == self.secret_key && secret.is_none() {
                        secret = Some(value);
                    }
                }
            }
        }

        match (identity, secret) {
            (Some(identity), Some(secret)) => Ok(Credentials::new(identity, secret)),
            (identity, secret) => {
                let mut keys = Vec::new();
                if identity.is_none() {
                    keys.push(self.identity_key.clone());
                }
                if secret.is_none() {
                    keys.push(self.secret_key.clone());
                }
                Err(AppError::MissingCredentials { keys })
            }
        }
    }
}

/// Reads `KEY=value` pairs in file order. A missing file yields nothing.
///
/// Blank lines, `#` comment lines and lines without `=` are skipped. Values
/// are taken literally apart from one pair of surrounding quotes: no
/// variable expansion, escapes or inline comments.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, AppError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Credential file not found");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(AppError::Config(format!(
                "Failed to read credential file {}: {e}",
                path.display()
            )));
        }
    };
    Ok(parse_env_lines(&contents))
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (number, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::debug!(line = number + 1, "Skipping line without '='");
            continue;
        };
        pairs.push((key.trim().to_string(), unquote(value.trim()).to_string()));
    }
    pairs
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
