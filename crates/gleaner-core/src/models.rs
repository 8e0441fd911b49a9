use std::collections::HashSet;
use std::fmt;

use serde::{Serialize, Serializer};
use url::Url;

use crate::error::AppError;

/// Outcome of a bounded wait against the live page.
///
/// Timeouts and missing elements are expected on a dynamic page, so they are
/// values the caller must branch on rather than errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The precondition became observable and the action completed.
    Ready(T),
    /// The element existed (or may have) but the wait ran out of time.
    TimedOut,
    /// Nothing matched the locator.
    Absent,
}

impl<T> Probe<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Probe::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Probe::Ready(value) => Some(value),
            Probe::TimedOut | Probe::Absent => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Probe<U> {
        match self {
            Probe::Ready(value) => Probe::Ready(f(value)),
            Probe::TimedOut => Probe::TimedOut,
            Probe::Absent => Probe::Absent,
        }
    }
}

/// Ordered set of unique identifiers, kept in first-observed order.
///
/// Empty strings and values containing `/` are never admitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id` unless it is invalid or already present.
    /// Returns true if the set grew.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if id.is_empty() || id.contains('/') || self.seen.contains(&id) {
            return false;
        }
        self.seen.insert(id.clone());
        self.order.push(id);
        true
    }

    /// Inserts every candidate in order; returns how many were new.
    pub fn extend_new<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for id in ids {
            if self.insert(id) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }
}

impl Serialize for IdentifierSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.order)
    }
}

/// Where session acquisition ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Authenticated,
    /// The landing URL was never observed. The page may still be usable.
    Unauthenticated,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Authenticated => write!(f, "authenticated"),
            AuthState::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Matches URLs inside the authenticated area of a site.
///
/// A URL matches when it shares the base URL's origin, its path starts with
/// the base path, and it does not fall under any excluded path prefix.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    base: Url,
    excluded: Vec<String>,
}

impl UrlPattern {
    pub fn new(base: &str) -> Result<Self, AppError> {
        let base = Url::parse(base)
            .map_err(|e| AppError::Config(format!("Invalid URL pattern base '{base}': {e}")))?;
        Ok(Self {
            base,
            excluded: Vec::new(),
        })
    }

    /// Excludes every path starting with `prefix` (e.g. the login surface).
    pub fn excluding(mut self, prefix: impl Into<String>) -> Self {
        self.excluded.push(prefix.into());
        self
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let Ok(url) = Url::parse(candidate) else {
            return false;
        };
        url.scheme() == self.base.scheme()
            && url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default()
            && url.path().starts_with(self.base.path())
            && !self.excluded.iter().any(|p| url.path().starts_with(p.as_str()))
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.base)?;
        for prefix in &self.excluded {
            write!(f, " !{prefix}")?;
        }
        Ok(())
    }
}
