//! Build orchestrator.
//!
//! Runs the phases of [`PHASES`](crate::phases::PHASES) strictly in order,
//! each inside its own span under one root `build` span. A required phase
//! that fails aborts the run; an optional one is logged and the run moves
//! on.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument, Span};

use crate::actions::{Actions, Cascade, CascadeQueue, DrainReport};
use crate::artifacts;
use crate::cache::{CacheEngine, CacheOutcome, Fingerprint};
use crate::config::{SiteConfig, SitePaths};
use crate::error::{BuildError, HookError, Result};
use crate::events::{BuildEvent, EventBus, PhaseGuard, PhaseStatus};
use crate::hooks::{HandlerRegistry, Hook, HookCall, HookOutcome, HookRunner, PluginHost};
use crate::manifest;
use crate::phases::{self, BuildPhase};
use crate::services::Services;
use crate::store::SiteStore;

/// Extensions page components may always use.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".mjs", ".js", ".jsx", ".wasm", ".json"];

/// Directory inside the cache that receives the runtime template.
const RUNTIME_CACHE_DIR: &str = "runtime";

/// Actions handed to non-cascading hooks are attributed per plugin by the runner.
const ORCHESTRATOR: &str = "strata";

/// Outcome of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub name: &'static str,
    pub status: PhaseStatus,
    pub duration_ms: u64,
}

/// Everything later build stages need from a completed run.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub store: SiteStore,
    /// Resolvable component extensions, defaults first.
    pub extensions: Vec<String>,
    pub fingerprint: Fingerprint,
    pub cache: CacheOutcome,
    pub phases: Vec<PhaseReport>,
    pub paths: SitePaths,
    pub duration: Duration,
}

/// Opens phase scopes and records their reports.
struct PhaseTracker<'a> {
    root: &'a Span,
    events: &'a EventBus,
    reports: Vec<PhaseReport>,
}

impl<'a> PhaseTracker<'a> {
    fn new(root: &'a Span, events: &'a EventBus) -> Self {
        Self {
            root,
            events,
            reports: Vec::with_capacity(phases::PHASES.len()),
        }
    }

    fn enter(&self, phase: &BuildPhase) -> PhaseGuard {
        PhaseGuard::enter(phase.name, self.root, self.events)
    }

    fn close(&mut self, guard: PhaseGuard, status: PhaseStatus) {
        self.reports.push(PhaseReport {
            name: guard.phase(),
            status,
            duration_ms: guard.elapsed().as_millis() as u64,
        });
        guard.finish(status);
    }
}

/// Runs one build over a site root.
pub struct Orchestrator {
    config: SiteConfig,
    root: PathBuf,
    handlers: HandlerRegistry,
    services: Services,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(config: SiteConfig, root: impl Into<PathBuf>, handlers: HandlerRegistry) -> Self {
        Self {
            config,
            root: root.into(),
            handlers,
            services: Services::default(),
            events: EventBus::new(),
        }
    }

    /// Use the given schema and query stages instead of no-ops.
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Subscribe to lifecycle events. Subscribe before calling [`run`](Self::run).
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Execute every phase once, in order.
    pub async fn run(&self) -> Result<BuildResult> {
        let start = Instant::now();
        let span = tracing::info_span!("build", root = %self.root.display());

        info!("Starting build in {:?}", self.root);
        let result = self.run_phases(&span, start).instrument(span.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(build) => info!(
                "Build finished in {}ms with {} pages",
                duration_ms,
                build.store.pages().await.len()
            ),
            Err(e) => warn!("Build failed after {}ms: {}", duration_ms, e),
        }
        self.events.broadcast(BuildEvent::RunFinished {
            success: result.is_ok(),
            duration_ms,
        });
        result
    }

    async fn run_phases(&self, root_span: &Span, start: Instant) -> Result<BuildResult> {
        let mut tracker = PhaseTracker::new(root_span, &self.events);
        let store = SiteStore::new();
        let concurrency = self.config.concurrency();

        // open-config
        let guard = tracker.enter(&phases::OPEN_CONFIG);
        let paths = guard.span().in_scope(|| -> Result<SitePaths> {
            self.config.validate()?;
            let paths = self.config.paths(&self.root);
            debug!("Cache directory: {:?}", paths.cache_dir);
            Ok(paths)
        })?;
        tracker.close(guard, PhaseStatus::Succeeded);

        // load-plugins
        let guard = tracker.enter(&phases::LOAD_PLUGINS);
        let host = guard.span().in_scope(|| {
            let (host, warnings) =
                PluginHost::load(&self.config.plugins, &self.handlers, &self.root, concurrency);
            for warning in &warnings {
                warn!("{}", warning);
            }
            info!("Loaded {} plugins", self.config.plugins.len());
            host
        });
        tracker.close(guard, PhaseStatus::Succeeded);
        let runner: &dyn HookRunner = &host;

        // pre-init
        self.hook_phase(&mut tracker, runner, &phases::PRE_INIT, Value::Null, &store)
            .await?;

        // delete-stale-artifacts
        let guard = tracker.enter(&phases::DELETE_STALE_ARTIFACTS);
        let status = if !self.config.site.production {
            PhaseStatus::Skipped
        } else {
            match guard
                .span()
                .in_scope(|| artifacts::delete_stale_artifacts(&paths.public_dir))
            {
                Ok(deleted) => {
                    info!("Deleted {} stale artifacts", deleted);
                    PhaseStatus::Succeeded
                }
                Err(e) => {
                    warn!(phase = phases::DELETE_STALE_ARTIFACTS.name, "{}", e);
                    PhaseStatus::Degraded
                }
            }
        };
        tracker.close(guard, status);

        // initialize-cache
        let guard = tracker.enter(&phases::INITIALIZE_CACHE);
        let engine = CacheEngine::new(&paths);
        let cache = engine
            .initialize(&self.config.plugins, &self.config.cache.flags, &store)
            .instrument(guard.span().clone())
            .await;
        if cache.wiped {
            self.events.broadcast(BuildEvent::CacheReset);
        }
        // Pages written from here on belong to this run
        store.pages_mut().await.begin_generation();
        tracker.close(guard, PhaseStatus::Succeeded);

        // copy-runtime-files
        let guard = tracker.enter(&phases::COPY_RUNTIME_FILES);
        guard.span().in_scope(|| -> Result<()> {
            if let Some(runtime_dir) = &paths.runtime_dir {
                artifacts::copy_dir(runtime_dir, &paths.cache_dir.join(RUNTIME_CACHE_DIR))?;
            }
            manifest::write_plugin_manifests(&paths.cache_dir, &self.config.plugins)
        })?;
        tracker.close(guard, PhaseStatus::Succeeded);

        for phase in [
            &phases::PRE_BOOTSTRAP,
            &phases::SCHEMA_CUSTOMIZATION,
            &phases::SOURCE_NODES,
        ] {
            self.hook_phase(&mut tracker, runner, phase, Value::Null, &store)
                .await?;
        }

        // build-schema
        let guard = tracker.enter(&phases::BUILD_SCHEMA);
        self.services
            .schema
            .build()
            .instrument(guard.span().clone())
            .await
            .map_err(|message| BuildError::Stage {
                stage: phases::BUILD_SCHEMA.name,
                message,
            })?;
        tracker.close(guard, PhaseStatus::Succeeded);

        // resolve-extensions
        let outcomes = self
            .hook_phase(
                &mut tracker,
                runner,
                &phases::RESOLVE_EXTENSIONS,
                Value::Null,
                &store,
            )
            .await?;
        let extensions = merge_extensions(&outcomes);
        debug!("Resolvable extensions: {:?}", extensions);

        // create-pages
        let args = json!({ "extensions": extensions });
        let guard = tracker.enter(&phases::CREATE_PAGES);
        let report = self
            .cascading(runner, &phases::CREATE_PAGES, args.clone(), &store, false)
            .instrument(guard.span().clone())
            .await?;
        let swept = store.pages_mut().await.sweep_untouched();
        guard.span().in_scope(|| {
            info!(
                "Settled after {} passes, {} actions",
                report.passes, report.actions
            );
            if !swept.is_empty() {
                info!("Deleted {} stale pages", swept.len());
            }
        });
        tracker.close(guard, PhaseStatus::Succeeded);

        // create-pages-statefully
        let guard = tracker.enter(&phases::CREATE_PAGES_STATEFULLY);
        let report = self
            .cascading(runner, &phases::CREATE_PAGES_STATEFULLY, args, &store, true)
            .instrument(guard.span().clone())
            .await?;
        guard.span().in_scope(|| {
            info!(
                "Settled after {} passes, {} actions",
                report.passes, report.actions
            )
        });
        tracker.close(guard, PhaseStatus::Succeeded);

        // pre-extract-queries
        self.hook_phase(
            &mut tracker,
            runner,
            &phases::PRE_EXTRACT_QUERIES,
            Value::Null,
            &store,
        )
        .await?;

        // rebuild-schema
        let guard = tracker.enter(&phases::REBUILD_SCHEMA);
        self.services
            .schema
            .rebuild()
            .instrument(guard.span().clone())
            .await
            .map_err(|message| BuildError::Stage {
                stage: phases::REBUILD_SCHEMA.name,
                message,
            })?;
        tracker.close(guard, PhaseStatus::Succeeded);

        // extract-queries
        let guard = tracker.enter(&phases::EXTRACT_QUERIES);
        let pages = store.pages().await.snapshot();
        self.services
            .queries
            .extract(&pages)
            .instrument(guard.span().clone())
            .await
            .map_err(|message| BuildError::Stage {
                stage: phases::EXTRACT_QUERIES.name,
                message,
            })?;
        tracker.close(guard, PhaseStatus::Succeeded);

        // write-requires
        let guard = tracker.enter(&phases::WRITE_REQUIRES);
        let pages = store.pages().await.snapshot();
        guard
            .span()
            .in_scope(|| manifest::write_requires(&paths.cache_dir, &self.root, &pages))?;
        tracker.close(guard, PhaseStatus::Succeeded);

        // write-redirects
        let guard = tracker.enter(&phases::WRITE_REDIRECTS);
        let redirects = store.redirects().await;
        guard
            .span()
            .in_scope(|| manifest::write_redirects(&paths.cache_dir, &redirects))?;
        tracker.close(guard, PhaseStatus::Succeeded);

        // post-bootstrap
        self.hook_phase(
            &mut tracker,
            runner,
            &phases::POST_BOOTSTRAP,
            Value::Null,
            &store,
        )
        .await?;

        if let Err(e) = engine.save_state(store.snapshot().await) {
            warn!("{}", e);
        }

        Ok(BuildResult {
            store,
            extensions,
            fingerprint: cache.fingerprint.clone(),
            cache,
            phases: tracker.reports,
            paths,
            duration: start.elapsed(),
        })
    }

    /// Run a non-cascading hook phase and return every participant's outcome.
    async fn hook_phase(
        &self,
        tracker: &mut PhaseTracker<'_>,
        runner: &dyn HookRunner,
        phase: &BuildPhase,
        args: Value,
        store: &SiteStore,
    ) -> Result<Vec<HookOutcome>> {
        let guard = tracker.enter(phase);
        let Some(hook) = phase.extension_point else {
            tracker.close(guard, PhaseStatus::Succeeded);
            return Ok(Vec::new());
        };

        let actions = Actions::detached(store.clone(), ORCHESTRATOR);
        let outcomes = runner
            .invoke(HookCall::new(hook, args, actions))
            .instrument(guard.span().clone())
            .await;
        let errors = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().cloned())
            .collect();

        let status = guard.span().in_scope(|| settle(phase, errors))?;
        tracker.close(guard, status);
        Ok(outcomes)
    }

    /// Invoke a page-creating hook and drain its cascade to a fixed point.
    async fn cascading(
        &self,
        runner: &dyn HookRunner,
        phase: &BuildPhase,
        args: Value,
        store: &SiteStore,
        stateful: bool,
    ) -> Result<DrainReport> {
        let Some(hook) = phase.extension_point else {
            return Ok(DrainReport::default());
        };

        let mut queue = CascadeQueue::new();
        let actions = Actions::queued(store.clone(), queue.sender(), ORCHESTRATOR, stateful);
        let outcomes = runner
            .invoke(HookCall::new(hook, args, actions.clone()))
            .await;
        let mut errors: Vec<HookError> = outcomes.into_iter().filter_map(|o| o.result.err()).collect();

        let mut report = queue
            .drain(
                self.config.cache.max_cascade_passes,
                self.config.concurrency(),
                move |cascade| {
                    let actions = actions.clone();
                    async move {
                        match cascade {
                            Cascade::PageCreated(page) => {
                                let owner = page.owner.clone();
                                let call =
                                    HookCall::new(Hook::OnCreatePage, json!({ "page": page }), actions)
                                        .skipping(owner);
                                runner
                                    .invoke(call)
                                    .await
                                    .into_iter()
                                    .filter_map(|o| o.result.err())
                                    .collect::<Vec<_>>()
                            }
                            Cascade::PageDeleted(_) => Vec::new(),
                            Cascade::Deferred { plugin, work } => match work.await {
                                Ok(()) => Vec::new(),
                                Err(e) => vec![HookError {
                                    plugin,
                                    hook: hook.name().to_string(),
                                    message: e.message,
                                }],
                            },
                        }
                    }
                },
            )
            .await
            .map_err(|e| BuildError::CascadeLimitExceeded {
                phase: phase.name,
                passes: e.passes,
            })?;

        errors.append(&mut report.errors);
        settle(phase, errors)?;
        Ok(report)
    }
}

/// Turn participant failures into a phase status, or a fatal error for
/// required phases.
fn settle(phase: &BuildPhase, errors: Vec<HookError>) -> Result<PhaseStatus> {
    if errors.is_empty() {
        return Ok(PhaseStatus::Succeeded);
    }
    if phase.optional {
        for e in &errors {
            warn!(phase = phase.name, plugin = %e.plugin, "{}", e);
        }
        return Ok(PhaseStatus::Degraded);
    }
    Err(BuildError::HookFailed {
        phase: phase.name,
        errors,
    })
}

/// Defaults plus every extension plugins returned, without duplicates.
fn merge_extensions(outcomes: &[HookOutcome]) -> Vec<String> {
    let mut extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    for outcome in outcomes {
        let Ok(value) = &outcome.result else {
            continue;
        };
        let Some(items) = value.as_array() else {
            debug!(plugin = %outcome.plugin, "Ignoring non-list resolvableExtensions result");
            continue;
        };
        for ext in items.iter().filter_map(Value::as_str) {
            if !extensions.iter().any(|e| e == ext) {
                extensions.push(ext.to_string());
            }
        }
    }
    extensions
}
