//! Clean command - Delete the build cache
//!
//! Removes the cache directory and the fingerprint baseline, so the next
//! build starts from scratch.

use crate::output::{Output, OutputConfig, TableDisplay};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::fs;

use strata_core::SiteConfig;

use super::build::resolve_root;

/// What the clean command removed.
#[derive(Debug, Clone, Serialize)]
pub struct CleanResult {
    pub removed: Vec<String>,
}

impl TableDisplay for CleanResult {
    fn to_table(&self) -> String {
        if self.removed.is_empty() {
            return format!("{}", "Nothing to clean".dimmed());
        }

        let mut lines = vec![format!("{}", "Cache cleared".green().bold())];
        for path in &self.removed {
            lines.push(format!("  {} {}", "removed".cyan(), path));
        }
        lines.join("\n")
    }
}

/// Run the clean command.
pub async fn run(path: &str, output: OutputConfig) -> Result<()> {
    let root = resolve_root(path);
    let config = SiteConfig::load(&root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    let paths = config.paths(&root);

    let mut removed = Vec::new();
    if paths.cache_dir.exists() {
        fs::remove_dir_all(&paths.cache_dir)
            .with_context(|| format!("Failed to remove {}", paths.cache_dir.display()))?;
        removed.push(paths.cache_dir.display().to_string());
    }
    if paths.fingerprint_file.exists() {
        fs::remove_file(&paths.fingerprint_file)
            .with_context(|| format!("Failed to remove {}", paths.fingerprint_file.display()))?;
        removed.push(paths.fingerprint_file.display().to_string());
    }
    tracing::debug!("Removed {} cache entries", removed.len());

    Output::new(CleanResult { removed }, output).render()
}
