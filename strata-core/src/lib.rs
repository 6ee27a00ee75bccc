//! Strata core: plugin-driven site build orchestration.
//!
//! A build run loads the configured plugin set, checks whether the
//! persistent cache is still valid, then executes a fixed sequence of
//! phases. Plugins take part by implementing hooks; pages they create go
//! into a validated, keyed [`PageRegistry`](pages::PageRegistry).
//!
//! ```no_run
//! use strata_core::{plugins, HandlerRegistry, Orchestrator, SiteConfig};
//! use std::path::Path;
//!
//! # async fn build() -> strata_core::Result<()> {
//! let root = Path::new("my-site");
//! let config = SiteConfig::load(root)?;
//! let mut handlers = HandlerRegistry::new();
//! plugins::register_builtins(&mut handlers);
//!
//! let result = Orchestrator::new(config, root, handlers).run().await?;
//! println!("{} pages", result.store.pages().await.len());
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod artifacts;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod manifest;
pub mod orchestrator;
pub mod pages;
pub mod phases;
pub mod plugins;
pub mod services;
pub mod store;

pub use actions::Actions;
pub use cache::{CacheOutcome, CacheStatus, Fingerprint};
pub use config::{PluginDescriptor, SiteConfig};
pub use error::{BuildError, HandlerError, HookError, Result, ValidationError};
pub use events::{BuildEvent, PhaseStatus};
pub use hooks::{HandlerRegistry, Hook, HookContext, HookRunner};
pub use orchestrator::{BuildResult, Orchestrator, PhaseReport};
pub use pages::{PageDefinition, PageInput};
pub use store::{Redirect, SiteStore};
