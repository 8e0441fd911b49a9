//! On-disk layout: `<base>/<id>/followers.txt` and `<base>/<id>/images/*.png`.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::IdentifierSet;

/// Default root for all per-person output.
pub const DEFAULT_DATA_DIR: &str = "data/people";

pub fn followers_path(base: &Path, identifier: &str) -> PathBuf {
    base.join(identifier).join("followers.txt")
}

pub fn images_dir(base: &Path, identifier: &str) -> PathBuf {
    base.join(identifier).join("images")
}

/// Renders one identifier per line; a trailing newline only when non-empty.
pub fn render_identifiers(set: &IdentifierSet) -> String {
    let mut out = set.as_slice().join("\n");
    if !set.is_empty() {
        out.push('\n');
    }
    out
}

/// Overwrites `path` with the rendered set, creating parent directories.
pub async fn write_identifiers(path: &Path, set: &IdentifierSet) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, render_identifiers(set)).await?;
    tracing::info!(path = %path.display(), count = set.len(), "Wrote identifiers");
    Ok(())
}
