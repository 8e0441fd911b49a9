/// Placeholder used when a label sanitizes to nothing.
pub const UNKNOWN_LABEL: &str = "unknown_user";

/// Turns a free-form label into a single safe path component.
///
/// Keeps Unicode alphanumerics, `_`, `-` and `.`; every other character
/// becomes `_`. Leading and trailing underscores are stripped.
/// Example: `"  spaces  /slash"` → `"spaces___slash"`
pub fn sanitize(label: &str) -> String {
    let replaced: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// First path segment of a site-relative href (`"/alice/"` → `"alice"`).
///
/// Returns `None` for empty results.
pub fn identifier_from_href(href: &str) -> Option<&str> {
    let segment = href.trim_matches('/').split('/').next()?;
    if segment.is_empty() || segment.contains('/') {
        None
    } else {
        Some(segment)
    }
}
