//! Status command - Show site configuration and cache state
//!
//! Reports what the next build would do with the cache without running it.

use crate::output::{Output, OutputConfig, TableDisplay};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::time::Instant;

use strata_core::cache::CacheEngine;
use strata_core::config::CONFIG_FILE;
use strata_core::{CacheStatus, SiteConfig};

use super::build::resolve_root;

/// Status information for a Strata site.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    /// Whether `strata.toml` exists
    pub config_exists: bool,
    /// Configured plugin names, in declaration order
    pub plugins: Vec<String>,
    /// Cache directory
    pub cache_dir: String,
    /// Fingerprint of the current plugins, config and flags
    pub fingerprint: String,
    /// What the next build will do with the cache
    pub cache_status: CacheStatus,
    /// Pages persisted by the last build, if the cache is usable
    pub cached_pages: Option<usize>,
    /// Recommended next action
    pub next_action: Option<String>,
    /// Time taken to gather status (in milliseconds)
    pub duration_ms: u64,
}

impl TableDisplay for StatusInfo {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();

        let headline = match self.cache_status {
            CacheStatus::Valid => "Strata Status: Cache valid".green().bold(),
            CacheStatus::Invalidated => "Strata Status: Cache stale".yellow().bold(),
            CacheStatus::Initialized => "Strata Status: Not built".yellow().bold(),
        };
        lines.push(format!("{}", headline));
        lines.push(format!(
            "  {}: {}",
            "Config".cyan(),
            if self.config_exists { "Yes" } else { "No" }
        ));
        lines.push(format!(
            "  {}: {}",
            "Plugins".cyan(),
            if self.plugins.is_empty() {
                "none".to_string()
            } else {
                self.plugins.join(", ")
            }
        ));
        lines.push(format!("  {}: {}", "Cache".cyan(), self.cache_dir));
        lines.push(format!("  {}: {}", "Fingerprint".cyan(), self.fingerprint));
        if let Some(pages) = self.cached_pages {
            lines.push(format!("  {}: {}", "Cached pages".cyan(), pages));
        }

        if let Some(action) = &self.next_action {
            lines.push(String::new());
            lines.push(format!("{}: {}", "Next action".yellow(), action));
        }

        lines.push(format!(
            "\n{}",
            format!("({} ms)", self.duration_ms).dimmed()
        ));
        lines.join("\n")
    }
}

/// Run the status command.
pub async fn run(path: &str, output: OutputConfig) -> Result<()> {
    let start = Instant::now();
    let root = resolve_root(path);

    let config = SiteConfig::load(&root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    let paths = config.paths(&root);
    let engine = CacheEngine::new(&paths);
    let (fingerprint, cache_status) = engine.inspect(&config.plugins, &config.cache.flags);

    let cached_pages = match cache_status {
        CacheStatus::Valid => match engine.load_state() {
            Ok(state) => state.map(|s| s.pages.len()),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        },
        _ => None,
    };

    let next_action = match cache_status {
        CacheStatus::Valid => None,
        CacheStatus::Invalidated => Some("strata build (cache will be rebuilt)".to_string()),
        CacheStatus::Initialized => Some("strata build".to_string()),
    };

    let status = StatusInfo {
        config_exists: root.join(CONFIG_FILE).exists(),
        plugins: config.plugins.iter().map(|p| p.name.clone()).collect(),
        cache_dir: paths.cache_dir.display().to_string(),
        fingerprint: fingerprint.to_string(),
        cache_status,
        cached_pages,
        next_action,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    Output::new(status, output).render()
}
