//! Shared site store handed to every phase and hook.
//!
//! The store is created at run start, reset when the cache is invalidated
//! and moved into the [`BuildResult`](crate::orchestrator::BuildResult) when
//! the run ends. Writers are serialized by the locks; a write is visible to
//! any read that starts after it returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ValidationError;
use crate::pages::{PageDefinition, PageRegistry};

/// A redirect requested by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    #[serde(rename = "fromPath", alias = "from_path")]
    pub from_path: String,
    #[serde(rename = "toPath", alias = "to_path")]
    pub to_path: String,
    #[serde(default, rename = "isPermanent", alias = "is_permanent")]
    pub is_permanent: bool,
    #[serde(default, rename = "redirectInBrowser", alias = "redirect_in_browser")]
    pub redirect_in_browser: bool,
}

impl Redirect {
    pub fn new(from_path: impl Into<String>, to_path: impl Into<String>) -> Self {
        Self {
            from_path: from_path.into(),
            to_path: to_path.into(),
            is_permanent: false,
            redirect_in_browser: false,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.from_path.trim().is_empty() || self.to_path.trim().is_empty() {
            return Err(ValidationError::MissingRedirectPath);
        }
        Ok(())
    }
}

/// Serializable copy of everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub pages: Vec<PageDefinition>,
    pub redirects: Vec<Redirect>,
    /// Per-plugin bookkeeping that must survive between runs.
    #[serde(default)]
    pub plugin_state: BTreeMap<String, Value>,
}

/// Pages and redirects shared across concurrent plugin invocations.
#[derive(Debug, Clone, Default)]
pub struct SiteStore {
    pages: Arc<RwLock<PageRegistry>>,
    redirects: Arc<RwLock<Vec<Redirect>>>,
    plugin_state: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl SiteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the page registry.
    pub async fn pages(&self) -> RwLockReadGuard<'_, PageRegistry> {
        self.pages.read().await
    }

    /// Write access to the page registry.
    pub async fn pages_mut(&self) -> RwLockWriteGuard<'_, PageRegistry> {
        self.pages.write().await
    }

    /// Record a redirect; exact duplicates are ignored.
    pub async fn add_redirect(&self, redirect: Redirect) -> Result<(), ValidationError> {
        redirect.validate()?;
        let mut redirects = self.redirects.write().await;
        if !redirects.contains(&redirect) {
            redirects.push(redirect);
        }
        Ok(())
    }

    /// Redirects in creation order.
    pub async fn redirects(&self) -> Vec<Redirect> {
        self.redirects.read().await.clone()
    }

    /// State a plugin recorded, in this run or a restored one.
    pub async fn plugin_state(&self, plugin: &str) -> Option<Value> {
        self.plugin_state.read().await.get(plugin).cloned()
    }

    pub async fn set_plugin_state(&self, plugin: &str, state: Value) {
        self.plugin_state
            .write()
            .await
            .insert(plugin.to_string(), state);
    }

    /// Drop every page, redirect and plugin state entry.
    pub async fn reset(&self) {
        self.pages.write().await.clear();
        self.redirects.write().await.clear();
        self.plugin_state.write().await.clear();
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            pages: self.pages.read().await.snapshot(),
            redirects: self.redirects.read().await.clone(),
            plugin_state: self.plugin_state.read().await.clone(),
        }
    }

    /// Replace the store contents with a persisted snapshot.
    pub async fn restore(&self, snapshot: StoreSnapshot) {
        *self.pages.write().await = PageRegistry::from_pages(snapshot.pages);
        *self.redirects.write().await = snapshot.redirects;
        *self.plugin_state.write().await = snapshot.plugin_state;
    }
}
