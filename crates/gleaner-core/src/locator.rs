//! Driver-independent element queries.
//!
//! A [`Locator`] is a chain of [`Step`]s evaluated left to right: each step
//! runs its [`Query`] inside every element matched by the previous step
//! (the document for the first step), optionally keeping only the n-th
//! match. Drivers decide how to evaluate a chain; the Chromium driver ships
//! it to the page as JSON.

use std::fmt;

use serde::Serialize;

/// One query inside a [`Step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Query {
    /// Plain CSS selector.
    Css { css: String },
    /// CSS selector filtered by the element's whitespace-normalized text.
    Text {
        css: String,
        text: String,
        /// `true`: normalized text equals `text`.
        /// `false`: case-insensitive substring match.
        exact: bool,
    },
    /// XPath expression evaluated relative to the scope element.
    Xpath { xpath: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub query: Query,
    pub nth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locator {
    steps: Vec<Step>,
}

impl Locator {
    fn from_query(query: Query) -> Self {
        Self {
            steps: vec![Step { query, nth: None }],
        }
    }

    pub fn css(css: impl Into<String>) -> Self {
        Self::from_query(Query::Css { css: css.into() })
    }

    pub fn text(css: impl Into<String>, text: impl Into<String>, exact: bool) -> Self {
        Self::from_query(Query::Text {
            css: css.into(),
            text: text.into(),
            exact,
        })
    }

    pub fn xpath(xpath: impl Into<String>) -> Self {
        Self::from_query(Query::Xpath {
            xpath: xpath.into(),
        })
    }

    /// Narrows to descendants matching `css`.
    pub fn locate(mut self, css: impl Into<String>) -> Self {
        self.steps.push(Step {
            query: Query::Css { css: css.into() },
            nth: None,
        });
        self
    }

    /// Keeps only the n-th (zero-based) match of the last step.
    pub fn nth(mut self, n: usize) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.nth = Some(n);
        }
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Css { css } => write!(f, "{css}"),
            Query::Text {
                css,
                text,
                exact: true,
            } => write!(f, "{css}:text-is({text:?})"),
            Query::Text {
                css,
                text,
                exact: false,
            } => write!(f, "{css}:has-text({text:?})"),
            Query::Xpath { xpath } => write!(f, "xpath={xpath}"),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " >> ")?;
            }
            write!(f, "{}", step.query)?;
            if let Some(n) = step.nth {
                write!(f, " >> nth={n}")?;
            }
        }
        Ok(())
    }
}

/// Encodes `value` as an XPath string literal, falling back to `concat()`
/// when it contains both quote characters.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value
        .split('\'')
        .map(|part| format!("'{part}'"))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}
