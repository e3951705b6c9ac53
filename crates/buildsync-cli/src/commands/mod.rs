//! CLI command implementations.

pub mod poll;
pub mod validate;

use anyhow::{Context, Result};
use buildsync_core::InMemoryCatalog;
use std::path::Path;

/// Load the catalog snapshot exported by the dashboard.
fn load_catalog(path: &Path) -> Result<InMemoryCatalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    InMemoryCatalog::from_json(&content)
        .with_context(|| format!("invalid catalog {}", path.display()))
}
