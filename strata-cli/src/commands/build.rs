//! Build command - Run every build phase over a site
//!
//! Loads `strata.toml`, registers the built-in plugins and runs the
//! orchestrator. A failing required phase makes the command exit non-zero.

use crate::output::{Output, OutputConfig, TableDisplay};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{builder::Builder, settings::Style};

use strata_core::{
    plugins, BuildResult, CacheStatus, HandlerRegistry, Orchestrator, PhaseReport, PhaseStatus,
    SiteConfig,
};

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub root: String,
    pub production: bool,
    pub pages: usize,
    pub components: usize,
    pub redirects: usize,
    pub extensions: Vec<String>,
    pub fingerprint: String,
    pub cache_status: CacheStatus,
    pub cache_wipe_requested: bool,
    pub cache_wiped: bool,
    pub restored_pages: usize,
    pub phases: Vec<PhaseReport>,
    pub duration_ms: u64,
}

impl BuildSummary {
    async fn from_result(root: &Path, production: bool, result: &BuildResult) -> Self {
        let (pages, components) = {
            let registry = result.store.pages().await;
            let mut components: Vec<&str> =
                registry.values().map(|p| p.component.as_str()).collect();
            components.sort_unstable();
            components.dedup();
            (registry.len(), components.len())
        };

        Self {
            root: root.display().to_string(),
            production,
            pages,
            components,
            redirects: result.store.redirects().await.len(),
            extensions: result.extensions.clone(),
            fingerprint: result.fingerprint.to_string(),
            cache_status: result.cache.status,
            cache_wipe_requested: result.cache.wipe_requested,
            cache_wiped: result.cache.wiped,
            restored_pages: result.cache.restored_pages,
            phases: result.phases.clone(),
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

fn status_label(status: PhaseStatus) -> String {
    match status {
        PhaseStatus::Succeeded => "ok".green().to_string(),
        PhaseStatus::Skipped => "skipped".dimmed().to_string(),
        PhaseStatus::Degraded => "degraded".yellow().to_string(),
        PhaseStatus::Failed => "failed".red().to_string(),
    }
}

/// Phase reports as a table; cells may carry ANSI colors.
fn phase_table(phases: &[PhaseReport]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Phase", "Status", "Time"]);
    for phase in phases {
        builder.push_record([
            phase.name.to_string(),
            status_label(phase.status),
            format!("{} ms", phase.duration_ms),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

impl TableDisplay for BuildSummary {
    fn to_table(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("{}", "Build complete".green().bold()));
        lines.push(format!("  {}: {}", "Root".cyan(), self.root));
        lines.push(format!(
            "  {}: {}",
            "Mode".cyan(),
            if self.production { "production" } else { "development" }
        ));
        lines.push(format!("  {}: {}", "Pages".cyan(), self.pages));
        lines.push(format!("  {}: {}", "Components".cyan(), self.components));
        lines.push(format!("  {}: {}", "Redirects".cyan(), self.redirects));

        let cache = match (self.cache_wipe_requested, self.cache_wiped, self.restored_pages) {
            (_, true, _) => "invalidated, rebuilt from scratch".to_string(),
            (true, false, _) => format!(
                "invalidated, {}",
                "cache directory could not be cleared".yellow()
            ),
            (false, false, 0) => format!("{:?}", self.cache_status).to_lowercase(),
            (false, false, n) => format!("valid, {} pages restored", n),
        };
        lines.push(format!("  {}: {}", "Cache".cyan(), cache));

        lines.push(String::new());
        lines.push(format!("{}", "Phases".bold()));
        lines.push(phase_table(&self.phases));
        lines.push(format!(
            "\n{}",
            format!("({} ms)", self.duration_ms).dimmed()
        ));
        lines.join("\n")
    }
}

/// Resolve a user-supplied site path.
pub fn resolve_root(path: &str) -> PathBuf {
    Path::new(path)
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(path))
}

/// Run the build command.
pub async fn run(path: &str, production: bool, output: OutputConfig) -> Result<()> {
    let root = resolve_root(path);
    let mut config = SiteConfig::load(&root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    if production {
        config.site.production = true;
    }

    let mut handlers = HandlerRegistry::new();
    plugins::register_builtins(&mut handlers);

    let result = Orchestrator::new(config.clone(), &root, handlers)
        .run()
        .await
        .context("Build failed")?;

    let summary = BuildSummary::from_result(&root, config.site.production, &result).await;
    Output::new(summary, output).render()
}
