//! Plugin-facing mutation surface and the cascade queue.
//!
//! Every page or redirect a plugin creates goes through [`Actions`]. The
//! mutation is applied to the [`SiteStore`] immediately, so the calling hook
//! reads its own writes, and a follow-up [`Cascade`] is queued for the
//! orchestrator. Cascading phases drain that queue until a pass finds it
//! empty.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::{HandlerError, HookError, ValidationError};
use crate::pages::{PageDefinition, PageInput};
use crate::store::{Redirect, SiteStore};

/// Follow-up work queued by an action.
pub enum Cascade {
    /// A page was written; `onCreatePage` implementers get to see it.
    PageCreated(PageDefinition),
    /// A page was removed.
    PageDeleted(String),
    /// Plugin-supplied async work the phase must wait for.
    Deferred {
        plugin: String,
        work: BoxFuture<'static, Result<(), HandlerError>>,
    },
}

impl std::fmt::Debug for Cascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cascade::PageCreated(page) => f.debug_tuple("PageCreated").field(&page.path).finish(),
            Cascade::PageDeleted(path) => f.debug_tuple("PageDeleted").field(path).finish(),
            Cascade::Deferred { plugin, .. } => {
                f.debug_struct("Deferred").field("plugin", plugin).finish()
            }
        }
    }
}

/// Handle through which one plugin mutates the site store.
#[derive(Debug, Clone)]
pub struct Actions {
    store: SiteStore,
    queue: Option<mpsc::UnboundedSender<Cascade>>,
    plugin: String,
    stateful: bool,
}

impl Actions {
    /// Actions outside cascading phases: writes apply, nothing cascades.
    pub fn detached(store: SiteStore, plugin: impl Into<String>) -> Self {
        Self {
            store,
            queue: None,
            plugin: plugin.into(),
            stateful: false,
        }
    }

    /// Actions feeding a cascade queue.
    pub fn queued(
        store: SiteStore,
        queue: mpsc::UnboundedSender<Cascade>,
        plugin: impl Into<String>,
        stateful: bool,
    ) -> Self {
        Self {
            store,
            queue: Some(queue),
            plugin: plugin.into(),
            stateful,
        }
    }

    /// Same queue and store, acting on behalf of another plugin.
    pub fn for_plugin(&self, plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            ..self.clone()
        }
    }

    /// Plugin these actions are attributed to.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Read access for hooks that inspect the store.
    pub fn store(&self) -> &SiteStore {
        &self.store
    }

    /// Validate and upsert a page owned by this plugin.
    pub async fn create_page(&self, input: PageInput) -> Result<PageDefinition, ValidationError> {
        let page = {
            let mut pages = self.store.pages_mut().await;
            if self.stateful {
                pages.create_or_update_stateful_page(input, &self.plugin)?
            } else {
                pages.create_or_update_page(input, &self.plugin)?
            }
        };
        tracing::debug!(plugin = %self.plugin, "Created page {}", page.path);
        self.enqueue(Cascade::PageCreated(page.clone()));
        Ok(page)
    }

    /// Delete a page. Deleting an absent path is a no-op.
    pub async fn delete_page(&self, path: &str) {
        let removed = self.store.pages_mut().await.delete_page(path);
        if let Some(page) = removed {
            tracing::debug!(plugin = %self.plugin, "Deleted page {}", page.path);
            self.enqueue(Cascade::PageDeleted(page.path));
        }
    }

    pub async fn create_redirect(&self, redirect: Redirect) -> Result<(), ValidationError> {
        self.store.add_redirect(redirect).await
    }

    /// Bookkeeping this plugin persisted earlier, if any.
    pub async fn plugin_state(&self) -> Option<serde_json::Value> {
        self.store.plugin_state(&self.plugin).await
    }

    /// Replace this plugin's persisted bookkeeping.
    pub async fn set_plugin_state(&self, state: serde_json::Value) {
        self.store.set_plugin_state(&self.plugin, state).await;
    }

    /// Queue async work the current phase must finish before completing.
    ///
    /// Only available in cascading phases.
    pub fn defer<F>(&self, work: F) -> Result<(), HandlerError>
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let Some(queue) = &self.queue else {
            return Err(HandlerError::new(
                "deferred work is only accepted while pages are being created",
            ));
        };
        queue
            .send(Cascade::Deferred {
                plugin: self.plugin.clone(),
                work: Box::pin(work),
            })
            .map_err(|_| HandlerError::new("phase already completed"))
    }

    fn enqueue(&self, cascade: Cascade) {
        if let Some(queue) = &self.queue {
            let _ = queue.send(cascade);
        }
    }
}

/// Result of draining a cascade queue to its fixed point.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Passes that found at least one action.
    pub passes: usize,
    /// Actions processed across all passes.
    pub actions: usize,
    /// Participant failures reported while processing.
    pub errors: Vec<HookError>,
}

/// The drain loop hit its pass limit with actions still arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassLimitExceeded {
    pub passes: usize,
}

/// Queue of cascading actions for one phase.
#[derive(Debug)]
pub struct CascadeQueue {
    tx: mpsc::UnboundedSender<Cascade>,
    rx: mpsc::UnboundedReceiver<Cascade>,
}

impl Default for CascadeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadeQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Cascade> {
        self.tx.clone()
    }

    /// Everything queued so far.
    pub fn take_pending(&mut self) -> Vec<Cascade> {
        let mut pending = Vec::new();
        while let Ok(cascade) = self.rx.try_recv() {
            pending.push(cascade);
        }
        pending
    }

    /// Process queued actions until a pass finds none.
    ///
    /// Each pass takes everything queued, processes it with up to
    /// `concurrency` actions in flight and waits for all of them; actions
    /// they queue are picked up by the next pass. More than `max_passes`
    /// non-empty passes fails.
    pub async fn drain<F, Fut>(
        &mut self,
        max_passes: usize,
        concurrency: usize,
        mut process: F,
    ) -> Result<DrainReport, PassLimitExceeded>
    where
        F: FnMut(Cascade) -> Fut,
        Fut: Future<Output = Vec<HookError>>,
    {
        let mut report = DrainReport::default();

        loop {
            let batch = self.take_pending();
            if batch.is_empty() {
                return Ok(report);
            }

            report.passes += 1;
            if report.passes > max_passes {
                return Err(PassLimitExceeded {
                    passes: report.passes,
                });
            }
            report.actions += batch.len();
            tracing::debug!("Cascade pass {}: {} actions", report.passes, batch.len());

            let errors: Vec<Vec<HookError>> = stream::iter(batch)
                .map(&mut process)
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
            report.errors.extend(errors.into_iter().flatten());
        }
    }
}
