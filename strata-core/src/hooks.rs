//! Plugin hooks and the hook runner.
//!
//! Plugins never get introspected at runtime. Handlers are registered up
//! front in a [`HandlerRegistry`], keyed by plugin name and hook; when the
//! plugin set is loaded, [`PluginHost`] binds each plugin's *declared* hooks
//! to its registered handlers. Invoking a hook fans out to the bound
//! plugins only, in declaration order.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;

use crate::actions::Actions;
use crate::config::PluginDescriptor;
use crate::error::{HandlerError, HookError};

/// Extension points plugins may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hook {
    OnPreInit,
    OnPreBootstrap,
    CreateSchemaCustomization,
    SourceNodes,
    ResolvableExtensions,
    CreatePages,
    CreatePagesStatefully,
    OnCreatePage,
    OnPreExtractQueries,
    OnPostBootstrap,
}

impl Hook {
    pub const ALL: &'static [Hook] = &[
        Hook::OnPreInit,
        Hook::OnPreBootstrap,
        Hook::CreateSchemaCustomization,
        Hook::SourceNodes,
        Hook::ResolvableExtensions,
        Hook::CreatePages,
        Hook::CreatePagesStatefully,
        Hook::OnCreatePage,
        Hook::OnPreExtractQueries,
        Hook::OnPostBootstrap,
    ];

    /// Name plugins use to declare the hook.
    pub fn name(self) -> &'static str {
        match self {
            Hook::OnPreInit => "onPreInit",
            Hook::OnPreBootstrap => "onPreBootstrap",
            Hook::CreateSchemaCustomization => "createSchemaCustomization",
            Hook::SourceNodes => "sourceNodes",
            Hook::ResolvableExtensions => "resolvableExtensions",
            Hook::CreatePages => "createPages",
            Hook::CreatePagesStatefully => "createPagesStatefully",
            Hook::OnCreatePage => "onCreatePage",
            Hook::OnPreExtractQueries => "onPreExtractQueries",
            Hook::OnPostBootstrap => "onPostBootstrap",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hook::ALL
            .iter()
            .copied()
            .find(|hook| hook.name() == s)
            .ok_or_else(|| format!("Unknown hook: '{}'", s))
    }
}

/// Everything a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub hook: Hook,
    pub plugin: Arc<PluginDescriptor>,
    pub args: Value,
    pub actions: Actions,
    pub root: PathBuf,
}

impl HookContext {
    /// The plugin's configured options.
    pub fn options(&self) -> &Value {
        &self.plugin.options
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Future returned by a handler.
pub type HookFuture = BoxFuture<'static, Result<Value, HandlerError>>;

/// A plugin's implementation of one hook.
pub type HookHandler = Arc<dyn Fn(HookContext) -> HookFuture + Send + Sync>;

/// Handlers keyed by plugin name and hook.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, Hook), HookHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &keys).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any earlier one for the same key.
    pub fn register<F, Fut>(&mut self, plugin: &str, hook: Hook, handler: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let handler: HookHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.handlers.insert((plugin.to_string(), hook), handler);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F, Fut>(mut self, plugin: &str, hook: Hook, handler: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(plugin, hook, handler);
        self
    }

    pub fn get(&self, plugin: &str, hook: Hook) -> Option<&HookHandler> {
        self.handlers.get(&(plugin.to_string(), hook))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// One hook invocation request.
#[derive(Debug, Clone)]
pub struct HookCall {
    pub hook: Hook,
    pub args: Value,
    /// Actions handle; re-attributed to each participating plugin.
    pub actions: Actions,
    /// Plugin to leave out, e.g. the owner of a freshly created page.
    pub skip: Option<String>,
}

impl HookCall {
    pub fn new(hook: Hook, args: Value, actions: Actions) -> Self {
        Self {
            hook,
            args,
            actions,
            skip: None,
        }
    }

    pub fn skipping(mut self, plugin: impl Into<String>) -> Self {
        self.skip = Some(plugin.into());
        self
    }
}

/// Result of one plugin's participation in a hook call.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub plugin: String,
    pub result: Result<Value, HookError>,
}

/// Invokes a hook across every plugin that supports it.
pub trait HookRunner: Send + Sync {
    /// Plugins bound to the hook, in declaration order.
    fn implementers(&self, hook: Hook) -> Vec<String>;

    /// Run the hook on every implementer. Zero implementers yields an empty
    /// result; a failing participant never stops the others.
    fn invoke(&self, call: HookCall) -> BoxFuture<'_, Vec<HookOutcome>>;
}

#[derive(Clone)]
struct Binding {
    plugin: Arc<PluginDescriptor>,
    handler: HookHandler,
}

/// Problems found while binding declared hooks to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingWarning {
    /// The plugin declares a hook name nobody knows.
    UnknownHook { plugin: String, hook: String },
    /// The plugin declares a hook but registered no handler for it.
    MissingHandler { plugin: String, hook: Hook },
}

impl fmt::Display for BindingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingWarning::UnknownHook { plugin, hook } => {
                write!(f, "Plugin '{}' declares unknown hook '{}'", plugin, hook)
            }
            BindingWarning::MissingHandler { plugin, hook } => write!(
                f,
                "Plugin '{}' declares {} but no handler is registered",
                plugin, hook
            ),
        }
    }
}

/// [`HookRunner`] backed by in-process handlers.
pub struct PluginHost {
    bindings: HashMap<Hook, Vec<Binding>>,
    root: PathBuf,
    concurrency: usize,
}

impl PluginHost {
    /// Bind every declared hook of every plugin to its registered handler.
    pub fn load(
        plugins: &[PluginDescriptor],
        handlers: &HandlerRegistry,
        root: &Path,
        concurrency: usize,
    ) -> (Self, Vec<BindingWarning>) {
        let mut bindings: HashMap<Hook, Vec<Binding>> = HashMap::new();
        let mut warnings = Vec::new();

        for descriptor in plugins {
            let plugin = Arc::new(descriptor.clone());
            for declared in &descriptor.hooks {
                let hook = match declared.parse::<Hook>() {
                    Ok(hook) => hook,
                    Err(_) => {
                        warnings.push(BindingWarning::UnknownHook {
                            plugin: descriptor.name.clone(),
                            hook: declared.clone(),
                        });
                        continue;
                    }
                };
                match handlers.get(&descriptor.name, hook) {
                    Some(handler) => bindings.entry(hook).or_default().push(Binding {
                        plugin: plugin.clone(),
                        handler: handler.clone(),
                    }),
                    None => warnings.push(BindingWarning::MissingHandler {
                        plugin: descriptor.name.clone(),
                        hook,
                    }),
                }
            }
        }

        let host = Self {
            bindings,
            root: root.to_path_buf(),
            concurrency: concurrency.max(1),
        };
        (host, warnings)
    }
}

impl HookRunner for PluginHost {
    fn implementers(&self, hook: Hook) -> Vec<String> {
        self.bindings
            .get(&hook)
            .map(|bound| bound.iter().map(|b| b.plugin.name.clone()).collect())
            .unwrap_or_default()
    }

    fn invoke(&self, call: HookCall) -> BoxFuture<'_, Vec<HookOutcome>> {
        Box::pin(async move {
            let Some(bound) = self.bindings.get(&call.hook) else {
                return Vec::new();
            };
            let hook = call.hook;

            let participants = bound
                .iter()
                .filter(|b| call.skip.as_deref() != Some(b.plugin.name.as_str()))
                .map(|binding| {
                    let plugin = binding.plugin.name.clone();
                    let ctx = HookContext {
                        hook,
                        plugin: binding.plugin.clone(),
                        args: call.args.clone(),
                        actions: call.actions.for_plugin(&plugin),
                        root: self.root.clone(),
                    };
                    let span = tracing::debug_span!("hook", hook = hook.name(), plugin = %plugin);
                    let work = tokio::spawn((binding.handler)(ctx).instrument(span));

                    async move {
                        let result = match work.await {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(e)) => Err(e.message),
                            Err(join) => Err(format!("handler panicked: {}", join)),
                        };
                        HookOutcome {
                            result: result.map_err(|message| HookError {
                                plugin: plugin.clone(),
                                hook: hook.name().to_string(),
                                message,
                            }),
                            plugin,
                        }
                    }
                })
                .collect::<Vec<_>>();

            stream::iter(participants)
                .buffered(self.concurrency)
                .collect()
                .await
        })
    }
}
