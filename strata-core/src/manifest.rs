//! Generated files written into the cache directory.
//!
//! Downstream tooling content-hashes these files, so each one is a pure
//! function of its inputs and is only rewritten when its bytes change.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use crate::config::PluginDescriptor;
use crate::error::{BuildError, Result};
use crate::pages::PageDefinition;
use crate::store::Redirect;

pub const BROWSER_MANIFEST: &str = "browser-plugins.json";
pub const SSR_MANIFEST: &str = "ssr-plugins.json";
pub const REQUIRES_MANIFEST: &str = "requires.json";
pub const MATCH_PATHS_MANIFEST: &str = "match-paths.json";
pub const REDIRECTS_FILE: &str = "redirects.json";

// Route ranking weights
const SEGMENT_POINTS: i64 = 4;
const STATIC_POINTS: i64 = 3;
const DYNAMIC_POINTS: i64 = 2;
const SPLAT_PENALTY: i64 = 1;
const ROOT_POINTS: i64 = 1;

/// Hex digits of the collision suffix.
const CHUNK_SUFFIX_LEN: usize = 8;

/// One plugin entry in a browser or SSR manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginManifestEntry {
    pub plugin: String,
    pub options: serde_json::Value,
}

impl PluginManifestEntry {
    fn from_descriptor(descriptor: &PluginDescriptor) -> Self {
        Self {
            plugin: descriptor.resolved().to_string(),
            options: descriptor.options.clone(),
        }
    }
}

/// Plugins with browser hooks, in declaration order.
pub fn browser_manifest(plugins: &[PluginDescriptor]) -> Vec<PluginManifestEntry> {
    plugins
        .iter()
        .filter(|p| p.browser_hooks)
        .map(PluginManifestEntry::from_descriptor)
        .collect()
}

/// Plugins with SSR hooks that did not opt out, in declaration order.
pub fn ssr_manifest(plugins: &[PluginDescriptor]) -> Vec<PluginManifestEntry> {
    plugins
        .iter()
        .filter(|p| p.ssr_hooks && !p.skip_ssr)
        .map(PluginManifestEntry::from_descriptor)
        .collect()
}

/// A page component the runtime must be able to load.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RequireEntry {
    pub component: String,
    #[serde(rename = "componentChunkName")]
    pub component_chunk_name: String,
}

/// A client-only route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchPathEntry {
    #[serde(rename = "matchPath")]
    pub match_path: String,
    pub path: String,
}

/// Stable chunk name for a component, derived from its site-relative path.
///
/// Distinct paths can slug to the same name; [`requires`] disambiguates.
pub fn component_chunk_name(root: &Path, component: &str) -> String {
    let relative = Path::new(component)
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| component.to_string());

    let mut slug = String::with_capacity(relative.len());
    for c in relative.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    format!("component---{}", slug.trim_matches('-'))
}

/// Suffix derived from the component path, for colliding chunk names.
fn chunk_suffix(component: &str) -> String {
    let hex = blake3::hash(component.as_bytes()).to_hex();
    hex.as_str()[..CHUNK_SUFFIX_LEN].to_string()
}

/// Unique components, sorted by component path.
///
/// Chunk names shared by several components get a hash suffix each, so
/// every entry names a distinct chunk.
pub fn requires(root: &Path, pages: &[PageDefinition]) -> Vec<RequireEntry> {
    let components: BTreeSet<&str> = pages.iter().map(|p| p.component.as_str()).collect();
    let mut entries: Vec<RequireEntry> = components
        .into_iter()
        .map(|component| RequireEntry {
            component: component.to_string(),
            component_chunk_name: component_chunk_name(root, component),
        })
        .collect();

    let mut uses: HashMap<String, usize> = HashMap::new();
    for entry in &entries {
        *uses.entry(entry.component_chunk_name.clone()).or_default() += 1;
    }
    for entry in &mut entries {
        if uses[&entry.component_chunk_name] > 1 {
            tracing::debug!(
                "Chunk name {} is shared, suffixing {}",
                entry.component_chunk_name,
                entry.component
            );
            entry.component_chunk_name = format!(
                "{}-{}",
                entry.component_chunk_name,
                chunk_suffix(&entry.component)
            );
        }
    }
    entries
}

/// Rank a route; more specific routes score higher.
pub fn route_rank(route: &str) -> i64 {
    route
        .trim_matches('/')
        .split('/')
        .fold(0, |score, segment| {
            let score = score + SEGMENT_POINTS;
            if segment.is_empty() {
                score + ROOT_POINTS
            } else if segment.starts_with(':') {
                score + DYNAMIC_POINTS
            } else if segment.starts_with('*') {
                score - SEGMENT_POINTS - SPLAT_PENALTY
            } else {
                score + STATIC_POINTS
            }
        })
}

/// Pages with a match path, most specific first.
pub fn match_paths(pages: &[PageDefinition]) -> Vec<MatchPathEntry> {
    let mut entries: Vec<MatchPathEntry> = pages
        .iter()
        .filter_map(|p| {
            p.match_path.as_ref().map(|m| MatchPathEntry {
                match_path: m.clone(),
                path: p.path.clone(),
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        route_rank(&b.match_path)
            .cmp(&route_rank(&a.match_path))
            .then_with(|| a.match_path.cmp(&b.match_path))
    });
    entries
}

/// Write `content` unless the file already holds exactly these bytes.
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, content: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == content {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(true)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<bool> {
    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');
    let written = write_if_changed(path, &content).map_err(|e| BuildError::io(path, e))?;
    if written {
        tracing::debug!("Wrote {:?}", path);
    } else {
        tracing::debug!("{:?} unchanged", path);
    }
    Ok(written)
}

/// Write the browser and SSR plugin manifests.
pub fn write_plugin_manifests(cache_dir: &Path, plugins: &[PluginDescriptor]) -> Result<()> {
    write_json(&cache_dir.join(BROWSER_MANIFEST), &browser_manifest(plugins))?;
    write_json(&cache_dir.join(SSR_MANIFEST), &ssr_manifest(plugins))?;
    Ok(())
}

/// Write the component requires and match-path manifests.
pub fn write_requires(cache_dir: &Path, root: &Path, pages: &[PageDefinition]) -> Result<()> {
    write_json(&cache_dir.join(REQUIRES_MANIFEST), &requires(root, pages))?;
    write_json(&cache_dir.join(MATCH_PATHS_MANIFEST), &match_paths(pages))?;
    Ok(())
}

pub fn write_redirects(cache_dir: &Path, redirects: &[Redirect]) -> Result<()> {
    write_json(&cache_dir.join(REDIRECTS_FILE), redirects)?;
    Ok(())
}
