//! Page definitions and the keyed page registry.
//!
//! Pages are keyed by their normalized path. Writing to an existing path
//! replaces the whole definition in place, so iteration order stays the
//! order in which paths were first created.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ValidationError;

/// Context keys the build sets itself; plugins may not supply them.
pub const RESERVED_CONTEXT_KEYS: &[&str] = &[
    "path",
    "matchPath",
    "component",
    "componentChunkName",
    "pluginCreator___NODE",
    "pluginCreatorId",
];

/// Page as submitted by a plugin, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInput {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "matchPath", alias = "match_path")]
    pub match_path: Option<String>,
}

impl PageInput {
    pub fn new(path: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            component: Some(component.into()),
            ..Default::default()
        }
    }

    /// Builder: add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Builder: set the client-side match path.
    pub fn with_match_path(mut self, match_path: impl Into<String>) -> Self {
        self.match_path = Some(match_path.into());
        self
    }
}

/// A validated, stored page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDefinition {
    /// Normalized path, always starting with `/`.
    pub path: String,
    /// Absolute path of the component that renders the page.
    pub component: String,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub match_path: Option<String>,
    /// Plugin that created the page.
    pub owner: String,
    /// Created during `createPagesStatefully`; such pages survive the
    /// untouched-page sweep after `createPages`.
    #[serde(default)]
    pub stateful: bool,
    /// Registry generation of the last write.
    #[serde(default)]
    pub generation: u64,
}

/// Add a leading slash if the path lacks one.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Keyed, insertion-ordered store of page definitions.
#[derive(Debug, Clone, Default)]
pub struct PageRegistry {
    pages: IndexMap<String, PageDefinition>,
    generation: u64,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted pages, keeping their order.
    pub fn from_pages(pages: Vec<PageDefinition>) -> Self {
        let generation = pages.iter().map(|p| p.generation).max().unwrap_or(0);
        let pages = pages.into_iter().map(|p| (p.path.clone(), p)).collect();
        Self { pages, generation }
    }

    /// Validate and store a page, replacing any page at the same path.
    pub fn create_or_update_page(
        &mut self,
        input: PageInput,
        owner: &str,
    ) -> Result<PageDefinition, ValidationError> {
        self.upsert(input, owner, false)
    }

    /// Same as [`create_or_update_page`](Self::create_or_update_page) but
    /// marks the page as created statefully.
    pub fn create_or_update_stateful_page(
        &mut self,
        input: PageInput,
        owner: &str,
    ) -> Result<PageDefinition, ValidationError> {
        self.upsert(input, owner, true)
    }

    fn upsert(
        &mut self,
        input: PageInput,
        owner: &str,
        stateful: bool,
    ) -> Result<PageDefinition, ValidationError> {
        let page = self.validate(input, owner, stateful)?;
        // IndexMap::insert keeps the original slot for an existing key
        self.pages.insert(page.path.clone(), page.clone());
        Ok(page)
    }

    fn validate(
        &self,
        input: PageInput,
        owner: &str,
        stateful: bool,
    ) -> Result<PageDefinition, ValidationError> {
        let path = match input.path.as_deref() {
            Some(p) if !p.trim().is_empty() => normalize_path(p),
            _ => return Err(ValidationError::MissingPath),
        };

        let component = match input.component {
            Some(c) if !c.trim().is_empty() => c,
            _ => return Err(ValidationError::MissingComponent { path }),
        };
        if !Path::new(&component).is_absolute() {
            return Err(ValidationError::ComponentNotAbsolute { path, component });
        }

        if let Some(key) = input
            .context
            .keys()
            .find(|k| RESERVED_CONTEXT_KEYS.contains(&k.as_str()))
        {
            return Err(ValidationError::ReservedContextKey {
                path,
                key: key.clone(),
            });
        }

        Ok(PageDefinition {
            path,
            component,
            context: input.context,
            match_path: input.match_path,
            owner: owner.to_string(),
            stateful,
            generation: self.generation,
        })
    }

    /// Remove a page. Deleting an absent path is a no-op.
    pub fn delete_page(&mut self, path: &str) -> Option<PageDefinition> {
        self.pages.shift_remove(&normalize_path(path))
    }

    pub fn get(&self, path: &str) -> Option<&PageDefinition> {
        self.pages.get(&normalize_path(path))
    }

    /// Pages in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &PageDefinition> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Start a new write generation and return it.
    pub fn begin_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop non-stateful pages that were not written in the current
    /// generation. Returns the removed paths.
    pub fn sweep_untouched(&mut self) -> Vec<String> {
        let current = self.generation;
        let stale: Vec<String> = self
            .pages
            .values()
            .filter(|p| !p.stateful && p.generation < current)
            .map(|p| p.path.clone())
            .collect();
        for path in &stale {
            self.pages.shift_remove(path);
        }
        stale
    }

    /// Owned copy of every page, in order.
    pub fn snapshot(&self) -> Vec<PageDefinition> {
        self.pages.values().cloned().collect()
    }
}
