//! External stages the orchestrator sequences but does not implement.
//!
//! Schema construction and query extraction belong to other subsystems. The
//! orchestrator only needs to call them at the right point and treat their
//! failure as fatal.

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::pages::PageDefinition;

/// Builds the data schema from sourced content.
pub trait SchemaStage: Send + Sync {
    /// Initial schema build, after nodes are sourced.
    fn build(&self) -> BoxFuture<'_, Result<(), String>>;

    /// Rebuild after pages exist, so page-derived types are included.
    fn rebuild(&self) -> BoxFuture<'_, Result<(), String>>;
}

/// Extracts queries from page components.
pub trait QueryStage: Send + Sync {
    fn extract<'a>(&'a self, pages: &'a [PageDefinition]) -> BoxFuture<'a, Result<(), String>>;
}

/// Stage implementation that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl SchemaStage for Noop {
    fn build(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }

    fn rebuild(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }
}

impl QueryStage for Noop {
    fn extract<'a>(&'a self, pages: &'a [PageDefinition]) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            tracing::debug!("No query extractor configured, skipping {} pages", pages.len());
            Ok(())
        })
    }
}

/// External stages used by one orchestrator.
#[derive(Clone)]
pub struct Services {
    pub schema: Arc<dyn SchemaStage>,
    pub queries: Arc<dyn QueryStage>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            schema: Arc::new(Noop),
            queries: Arc::new(Noop),
        }
    }
}
