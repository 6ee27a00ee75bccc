//! Site configuration loading from `strata.toml`.
//!
//! The configuration file lives in the site root. A missing file yields
//! defaults; a file that exists but cannot be read or parsed is a
//! configuration error, since building with silently-wrong plugins would
//! poison the cache.
//!
//! # Example Configuration
//!
//! ```toml
//! [site]
//! production = true
//! public_dir = "public"
//! runtime_dir = "runtime"
//! concurrency = 8
//!
//! [cache]
//! directory = ".strata/cache"
//! watch = ["strata.toml", "plugins.lock"]
//! max_cascade_passes = 64
//!
//! [cache.flags]
//! partial_hydration = false
//!
//! [[plugins]]
//! name = "page-creator"
//! version = "1.0.0"
//! resolve = "builtin/page-creator"
//! hooks = ["createPagesStatefully"]
//! browser_hooks = true
//! options = { path = "src/pages" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

/// Configuration file name looked up in the site root.
pub const CONFIG_FILE: &str = "strata.toml";

/// Default cache directory relative to the site root.
const DEFAULT_CACHE_DIR: &str = ".strata/cache";

/// Default public output directory relative to the site root.
const DEFAULT_PUBLIC_DIR: &str = "public";

/// Default upper bound on cascade drain passes per phase.
const DEFAULT_MAX_CASCADE_PASSES: usize = 64;

/// Watched files that are always part of the fingerprint.
const DEFAULT_WATCHED_FILES: &[&str] = &[CONFIG_FILE];

/// Root configuration structure loaded from `strata.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// General site settings.
    #[serde(default)]
    pub site: SiteSection,

    /// Cache and fingerprint settings.
    #[serde(default)]
    pub cache: CacheSection,

    /// Plugins in declaration order.
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
}

/// `[site]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteSection {
    /// Production builds delete stale HTML/CSS from the public directory.
    #[serde(default)]
    pub production: bool,

    /// Output directory, relative to the root.
    #[serde(default)]
    pub public_dir: Option<String>,

    /// Runtime template directory copied into the cache, if any.
    #[serde(default)]
    pub runtime_dir: Option<String>,

    /// Maximum number of plugin invocations in flight within one phase.
    ///
    /// Default: number of CPUs.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Cache directory, relative to the root.
    #[serde(default)]
    pub directory: Option<String>,

    /// Extra config files whose content is part of the fingerprint.
    ///
    /// `strata.toml` is always watched.
    #[serde(default)]
    pub watch: Vec<String>,

    /// Feature flags folded into the fingerprint.
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,

    /// Upper bound on drain passes for cascading phases.
    #[serde(default = "default_max_cascade_passes")]
    pub max_cascade_passes: usize,
}

fn default_max_cascade_passes() -> usize {
    DEFAULT_MAX_CASCADE_PASSES
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            directory: None,
            watch: Vec::new(),
            flags: BTreeMap::new(),
            max_cascade_passes: DEFAULT_MAX_CASCADE_PASSES,
        }
    }
}

/// A resolved plugin as handed over by plugin discovery.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Resolved location of the plugin; defaults to the name.
    #[serde(default)]
    pub resolve: String,
    /// Plugin options; must be a table.
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
    /// Names of the hooks this plugin implements.
    #[serde(default)]
    pub hooks: Vec<String>,
    /// Plugin ships server-rendering hooks.
    #[serde(default)]
    pub ssr_hooks: bool,
    /// Plugin ships browser hooks.
    #[serde(default)]
    pub browser_hooks: bool,
    /// Exclude from the SSR manifest even when `ssr_hooks` is set.
    #[serde(default)]
    pub skip_ssr: bool,
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl PluginDescriptor {
    /// Create a descriptor with empty options and no hooks.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resolve: name.clone(),
            name,
            version: version.into(),
            options: empty_options(),
            hooks: Vec::new(),
            ssr_hooks: false,
            browser_hooks: false,
            skip_ssr: false,
        }
    }

    /// Builder: declare a hook.
    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hooks.push(hook.into());
        self
    }

    /// Builder: set options.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Location used in generated manifests.
    pub fn resolved(&self) -> &str {
        if self.resolve.is_empty() {
            &self.name
        } else {
            &self.resolve
        }
    }

    /// Whether the plugin declared the given hook name.
    pub fn declares(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }
}

/// Absolute locations derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePaths {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    /// Fingerprint baseline; lives next to the cache so a wipe keeps it.
    pub fingerprint_file: PathBuf,
    pub public_dir: PathBuf,
    pub runtime_dir: Option<PathBuf>,
    /// Watched config files in fingerprint order.
    pub watched: Vec<PathBuf>,
}

impl SiteConfig {
    /// Load configuration from `strata.toml` in the given directory.
    ///
    /// Returns defaults when the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            tracing::debug!("No {} found in {:?}, using defaults", CONFIG_FILE, root);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            BuildError::config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BuildError::config(format!("Failed to parse {}: {}", CONFIG_FILE, e)))
    }

    /// Reject configuration forms the build cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for plugin in &self.plugins {
            if plugin.name.trim().is_empty() {
                return Err(BuildError::config("Plugin entries require a name"));
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(BuildError::config(format!(
                    "Plugin '{}' is declared more than once",
                    plugin.name
                )));
            }
            if !plugin.options.is_object() {
                return Err(BuildError::config(format!(
                    "Options for plugin '{}' must be a table",
                    plugin.name
                )));
            }
        }

        if self.site.concurrency == Some(0) {
            return Err(BuildError::config("site.concurrency must be at least 1"));
        }
        if self.cache.max_cascade_passes == 0 {
            return Err(BuildError::config(
                "cache.max_cascade_passes must be at least 1",
            ));
        }
        Ok(())
    }

    /// Resolve every configured location against the site root.
    pub fn paths(&self, root: &Path) -> SitePaths {
        let cache_dir = root.join(self.cache.directory.as_deref().unwrap_or(DEFAULT_CACHE_DIR));
        let fingerprint_file = cache_dir.with_file_name("fingerprint.json");
        let public_dir = root.join(self.site.public_dir.as_deref().unwrap_or(DEFAULT_PUBLIC_DIR));
        let runtime_dir = self.site.runtime_dir.as_deref().map(|dir| root.join(dir));
        let watched = self
            .watched_files()
            .iter()
            .map(|file| root.join(file))
            .collect();

        SitePaths {
            root: root.to_path_buf(),
            cache_dir,
            fingerprint_file,
            public_dir,
            runtime_dir,
            watched,
        }
    }

    /// Watched files, defaults first, without duplicates.
    pub fn watched_files(&self) -> Vec<String> {
        let mut files: Vec<String> = DEFAULT_WATCHED_FILES.iter().map(|f| f.to_string()).collect();
        for file in &self.cache.watch {
            if !files.iter().any(|f| f == file) {
                files.push(file.clone());
            }
        }
        files
    }

    /// Effective in-phase concurrency.
    pub fn concurrency(&self) -> usize {
        self.site.concurrency.unwrap_or_else(num_cpus::get).max(1)
    }
}
