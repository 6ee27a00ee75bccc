//! Integration tests for full build runs
//!
//! Each test runs the orchestrator against a temporary site root with
//! in-process plugin handlers.

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

use strata_core::phases::phase_names;
use strata_core::{
    plugins, BuildError, BuildEvent, CacheStatus, HandlerError, HandlerRegistry, Hook,
    Orchestrator, PageInput, PhaseStatus, PluginDescriptor, SiteConfig,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn config(plugins: Vec<PluginDescriptor>) -> SiteConfig {
    let mut config = SiteConfig::default();
    config.site.concurrency = Some(2);
    config.plugins = plugins;
    config
}

fn component(root: &Path, name: &str) -> String {
    root.join(name).to_string_lossy().to_string()
}

fn drain(rx: &mut broadcast::Receiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn started(events: &[BuildEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|e| match e {
            BuildEvent::PhaseStarted { phase } => Some(*phase),
            _ => None,
        })
        .collect()
}

fn finished(events: &[BuildEvent], name: &str) -> Vec<PhaseStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            BuildEvent::PhaseFinished { phase, status, .. } if *phase == name => Some(*status),
            _ => None,
        })
        .collect()
}

fn write_site_config(root: &Path, version: &str) {
    fs::write(
        root.join("strata.toml"),
        format!(
            r#"
[site]
concurrency = 2

[[plugins]]
name = "page-creator"
version = "{}"
hooks = ["createPagesStatefully"]
browser_hooks = true

[[plugins]]
name = "redirects"
version = "1.0.0"
hooks = ["createPages"]
options = {{ redirects = [{{ fromPath = "/old", toPath = "/" }}] }}
"#,
            version
        ),
    )
    .unwrap();
}

fn write_page(root: &Path, name: &str) {
    let path = root.join("src/pages").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "export default () => null").unwrap();
}

fn builtin_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    plugins::register_builtins(&mut handlers);
    handlers
}

// ============================================================================
// Phase Sequencing
// ============================================================================

#[tokio::test]
async fn test_phases_run_in_order() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(config(Vec::new()), dir.path(), HandlerRegistry::new());
    let mut rx = orchestrator.subscribe();

    let result = orchestrator.run().await.unwrap();
    let events = drain(&mut rx);

    assert_eq!(started(&events), phase_names());
    for name in phase_names() {
        assert_eq!(finished(&events, name).len(), 1, "phase {}", name);
    }
    assert!(matches!(
        events.last(),
        Some(BuildEvent::RunFinished { success: true, .. })
    ));

    let reported: Vec<_> = result.phases.iter().map(|p| p.name).collect();
    assert_eq!(reported, phase_names());
    // Development builds leave the public directory alone
    assert_eq!(result.phases[3].status, PhaseStatus::Skipped);
}

#[tokio::test]
async fn test_required_hook_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let plugins = vec![
        PluginDescriptor::new("broken", "1.0.0").with_hook("sourceNodes"),
        PluginDescriptor::new("fine", "1.0.0").with_hook("sourceNodes"),
    ];
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let handlers = HandlerRegistry::new()
        .with("broken", Hook::SourceNodes, |_| async {
            Err(HandlerError::new("remote API unavailable"))
        })
        .with("fine", Hook::SourceNodes, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

    let orchestrator = Orchestrator::new(config(plugins), dir.path(), handlers);
    let mut rx = orchestrator.subscribe();
    let err = orchestrator.run().await.unwrap_err();
    let events = drain(&mut rx);

    match err {
        BuildError::HookFailed { phase, errors } => {
            assert_eq!(phase, "source-nodes");
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].plugin, "broken");
            assert_eq!(errors[0].hook, "sourceNodes");
        }
        other => panic!("unexpected error: {}", other),
    }

    // Siblings still ran, the phase closed once, nothing after it started
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(finished(&events, "source-nodes"), vec![PhaseStatus::Failed]);
    assert_eq!(started(&events).last(), Some(&"source-nodes"));
    assert!(matches!(
        events.last(),
        Some(BuildEvent::RunFinished { success: false, .. })
    ));
}

#[tokio::test]
async fn test_optional_hook_failure_continues() {
    let dir = TempDir::new().unwrap();
    let plugins = vec![PluginDescriptor::new("flaky", "1.0.0")
        .with_hook("onPreInit")
        .with_hook("onPostBootstrap")];
    let handlers = HandlerRegistry::new()
        .with("flaky", Hook::OnPreInit, |_| async {
            Err(HandlerError::new("telemetry offline"))
        })
        .with("flaky", Hook::OnPostBootstrap, |_| async {
            Err(HandlerError::new("still offline"))
        });

    let result = Orchestrator::new(config(plugins), dir.path(), handlers)
        .run()
        .await
        .unwrap();

    let status = |name: &str| result.phases.iter().find(|p| p.name == name).unwrap().status;
    assert_eq!(status("pre-init"), PhaseStatus::Degraded);
    assert_eq!(status("source-nodes"), PhaseStatus::Succeeded);
    assert_eq!(status("post-bootstrap"), PhaseStatus::Degraded);
}

#[tokio::test]
async fn test_resolvable_extensions_reach_page_creation() {
    let dir = TempDir::new().unwrap();
    let plugins = vec![
        PluginDescriptor::new("typescript", "1.0.0").with_hook("resolvableExtensions"),
        PluginDescriptor::new("inspector", "1.0.0").with_hook("createPages"),
    ];
    let seen = Arc::new(Mutex::new(Value::Null));
    let sink = seen.clone();
    let handlers = HandlerRegistry::new()
        .with("typescript", Hook::ResolvableExtensions, |_| async {
            Ok(json!([".ts", ".tsx"]))
        })
        .with("inspector", Hook::CreatePages, move |ctx| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = ctx.args["extensions"].clone();
                Ok(Value::Null)
            }
        });

    let result = Orchestrator::new(config(plugins), dir.path(), handlers)
        .run()
        .await
        .unwrap();

    assert!(result.extensions.contains(&".tsx".to_string()));
    assert_eq!(*seen.lock().unwrap(), json!(result.extensions));
}

// ============================================================================
// Cascading Page Creation
// ============================================================================

#[tokio::test]
async fn test_cascade_settles_before_next_phase() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let plugins = vec![
        PluginDescriptor::new("source", "1.0.0").with_hook("createPages"),
        PluginDescriptor::new("observer", "1.0.0").with_hook("onCreatePage"),
        PluginDescriptor::new("checker", "1.0.0").with_hook("onPreExtractQueries"),
    ];

    let observed = Arc::new(Mutex::new(Vec::new()));
    let pages_seen = Arc::new(AtomicUsize::new(0));
    let (observed_sink, pages_sink) = (observed.clone(), pages_seen.clone());
    let component_a = component(&root, "a.js");

    let handlers = HandlerRegistry::new()
        .with("source", Hook::CreatePages, move |ctx| {
            let component = component_a.clone();
            async move {
                ctx.actions
                    .create_page(PageInput::new("/a/", component.clone()))
                    .await?;
                let later = ctx.actions.clone();
                ctx.actions.defer(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    later.create_page(PageInput::new("/b/", component)).await?;
                    Ok(())
                })?;
                Ok(Value::Null)
            }
        })
        .with("observer", Hook::OnCreatePage, move |ctx| {
            let sink = observed_sink.clone();
            async move {
                let path = ctx.args["page"]["path"].as_str().unwrap_or_default().to_string();
                sink.lock().unwrap().push(path);
                Ok(Value::Null)
            }
        })
        .with("checker", Hook::OnPreExtractQueries, move |ctx| {
            let sink = pages_sink.clone();
            async move {
                sink.store(ctx.actions.store().pages().await.len(), Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

    let result = Orchestrator::new(config(plugins), &root, handlers)
        .run()
        .await
        .unwrap();

    let mut observed = observed.lock().unwrap().clone();
    observed.sort();
    assert_eq!(observed, vec!["/a/", "/b/"]);
    assert_eq!(pages_seen.load(Ordering::SeqCst), 2);
    assert_eq!(result.store.pages().await.len(), 2);
}

#[tokio::test]
async fn test_on_create_page_skips_the_owner() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let plugins = vec![PluginDescriptor::new("source", "1.0.0")
        .with_hook("createPages")
        .with_hook("onCreatePage")];
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let page_component = component(&root, "a.js");

    let handlers = HandlerRegistry::new()
        .with("source", Hook::CreatePages, move |ctx| {
            let component = page_component.clone();
            async move {
                ctx.actions.create_page(PageInput::new("/a/", component)).await?;
                Ok(Value::Null)
            }
        })
        .with("source", Hook::OnCreatePage, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

    Orchestrator::new(config(plugins), &root, handlers)
        .run()
        .await
        .unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_endless_cascade_hits_pass_limit() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let plugins = vec![
        PluginDescriptor::new("ping", "1.0.0")
            .with_hook("createPages")
            .with_hook("onCreatePage"),
        PluginDescriptor::new("pong", "1.0.0").with_hook("onCreatePage"),
    ];

    // Each plugin rewrites every page the other one writes
    let rewrite = |ctx: strata_core::HookContext| async move {
        let page = ctx.args["page"].clone();
        let path = page["path"].as_str().unwrap_or("/").to_string();
        let component = page["component"].as_str().unwrap_or("/x.js").to_string();
        ctx.actions.create_page(PageInput::new(path, component)).await?;
        Ok::<_, HandlerError>(Value::Null)
    };
    let page_component = component(&root, "a.js");
    let handlers = HandlerRegistry::new()
        .with("ping", Hook::CreatePages, move |ctx| {
            let component = page_component.clone();
            async move {
                ctx.actions.create_page(PageInput::new("/a/", component)).await?;
                Ok(Value::Null)
            }
        })
        .with("ping", Hook::OnCreatePage, rewrite)
        .with("pong", Hook::OnCreatePage, rewrite);

    let mut config = config(plugins);
    config.cache.max_cascade_passes = 5;
    let err = Orchestrator::new(config, &root, handlers)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BuildError::CascadeLimitExceeded {
            phase: "create-pages",
            passes: 6
        }
    ));
}

#[tokio::test]
async fn test_invalid_page_fails_the_phase() {
    let dir = TempDir::new().unwrap();
    let plugins = vec![PluginDescriptor::new("sloppy", "1.0.0").with_hook("createPages")];
    let handlers = HandlerRegistry::new().with("sloppy", Hook::CreatePages, |ctx| async move {
        ctx.actions
            .create_page(PageInput::new("/x/", "relative/x.js"))
            .await?;
        Ok(Value::Null)
    });

    let err = Orchestrator::new(config(plugins), dir.path(), handlers)
        .run()
        .await
        .unwrap_err();

    match err {
        BuildError::HookFailed { phase, errors } => {
            assert_eq!(phase, "create-pages");
            assert!(errors[0].message.contains("absolute"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

// ============================================================================
// Cache Invalidation and Incremental State
// ============================================================================

#[tokio::test]
async fn test_config_change_wipes_cache() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_site_config(root, "1.0.0");
    write_page(root, "index.js");

    let build = |root: &Path| {
        let config = SiteConfig::load(root).unwrap();
        Orchestrator::new(config, root, builtin_handlers())
    };

    let first = build(root).run().await.unwrap();
    assert_eq!(first.cache.status, CacheStatus::Initialized);
    let marker = first.paths.cache_dir.join("marker");
    fs::write(&marker, "keep me").unwrap();

    let second = build(root).run().await.unwrap();
    assert_eq!(second.cache.status, CacheStatus::Valid);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(second.cache.restored_pages, 1);
    assert!(marker.exists());

    write_site_config(root, "2.0.0");
    let orchestrator = build(root);
    let mut rx = orchestrator.subscribe();
    let third = orchestrator.run().await.unwrap();

    assert_eq!(third.cache.status, CacheStatus::Invalidated);
    assert!(third.cache.wiped);
    assert_ne!(third.fingerprint, first.fingerprint);
    assert!(!marker.exists());
    assert!(drain(&mut rx).contains(&BuildEvent::CacheReset));
    // The run regenerates everything it needs
    assert_eq!(third.store.pages().await.len(), 1);
    assert!(third.paths.cache_dir.join("requires.json").exists());
}

#[tokio::test]
async fn test_untouched_pages_are_swept() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let paths = Arc::new(Mutex::new(vec!["/keep/", "/drop/"]));

    let build = |paths: Arc<Mutex<Vec<&'static str>>>| {
        let page_component = component(&root, "page.js");
        let handlers = HandlerRegistry::new().with("source", Hook::CreatePages, move |ctx| {
            let wanted = paths.lock().unwrap().clone();
            let component = page_component.clone();
            async move {
                for path in wanted {
                    ctx.actions
                        .create_page(PageInput::new(path, component.clone()))
                        .await?;
                }
                Ok(Value::Null)
            }
        });
        let plugins = vec![PluginDescriptor::new("source", "1.0.0").with_hook("createPages")];
        Orchestrator::new(config(plugins), &root, handlers)
    };

    let first = build(paths.clone()).run().await.unwrap();
    assert_eq!(first.store.pages().await.len(), 2);

    paths.lock().unwrap().pop();
    let second = build(paths.clone()).run().await.unwrap();

    assert_eq!(second.cache.restored_pages, 2);
    let pages = second.store.pages().await;
    assert_eq!(pages.len(), 1);
    assert!(pages.get("/keep/").is_some());
    assert!(pages.get("/drop/").is_none());
}

#[tokio::test]
async fn test_concurrent_writers_replace_whole_pages() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let writers = ["w0", "w1", "w2", "w3"];

    let mut handlers = HandlerRegistry::new();
    let mut plugins = Vec::new();
    for writer in writers {
        plugins.push(PluginDescriptor::new(writer, "1.0.0").with_hook("createPages"));
        let page_component = component(&root, &format!("{}.js", writer));
        handlers = handlers.with(writer, Hook::CreatePages, move |ctx| {
            let component = page_component.clone();
            async move {
                let mut paths: Vec<String> = (0..5).map(|i| format!("/shared-{}/", i)).collect();
                paths.push(format!("/own-{}/", writer));
                for path in paths {
                    let input = PageInput::new(path, component.clone())
                        .with_context("writer", json!(writer))
                        .with_context(format!("only_{}", writer), json!(true));
                    ctx.actions.create_page(input).await?;
                    tokio::task::yield_now().await;
                }
                Ok(Value::Null)
            }
        });
    }

    let mut site = config(plugins);
    site.site.concurrency = Some(4);
    let result = Orchestrator::new(site, &root, handlers)
        .run()
        .await
        .unwrap();

    let pages = result.store.pages().await;
    assert_eq!(pages.len(), 5 + writers.len());
    for page in pages.values() {
        let writer = page.context["writer"].as_str().unwrap();
        assert_eq!(page.context.len(), 2, "{} merged writes", page.path);
        assert_eq!(page.context[&format!("only_{}", writer)], json!(true));
        assert_eq!(page.component, component(&root, &format!("{}.js", writer)));
        assert_eq!(page.owner, writer);
    }
    for writer in writers {
        assert!(pages.get(&format!("/own-{}/", writer)).is_some());
    }
}

// ============================================================================
// Generated Files
// ============================================================================

#[tokio::test]
async fn test_generated_files_are_stable_across_runs() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_site_config(root, "1.0.0");
    write_page(root, "index.js");
    write_page(root, "blog/post.js");

    let run = || async move {
        let config = SiteConfig::load(root).unwrap();
        Orchestrator::new(config, root, builtin_handlers())
            .run()
            .await
            .unwrap()
    };

    let first = run().await;
    let cache_dir = first.paths.cache_dir.clone();
    let files = [
        "browser-plugins.json",
        "ssr-plugins.json",
        "requires.json",
        "match-paths.json",
        "redirects.json",
    ];
    let snapshot = |name: &str| {
        let path = cache_dir.join(name);
        (
            fs::read(&path).unwrap(),
            fs::metadata(&path).unwrap().modified().unwrap(),
        )
    };
    let before: Vec<_> = files.iter().map(|f| snapshot(f)).collect();

    run().await;
    let after: Vec<_> = files.iter().map(|f| snapshot(f)).collect();
    assert_eq!(before, after);

    let requires: Value =
        serde_json::from_slice(&fs::read(cache_dir.join("requires.json")).unwrap()).unwrap();
    assert_eq!(requires.as_array().unwrap().len(), 2);
    assert_eq!(
        requires[0]["componentChunkName"],
        "component---src-pages-blog-post-js"
    );

    let redirects: Value =
        serde_json::from_slice(&fs::read(cache_dir.join("redirects.json")).unwrap()).unwrap();
    assert_eq!(redirects[0]["fromPath"], "/old");

    let browser: Value =
        serde_json::from_slice(&fs::read(cache_dir.join("browser-plugins.json")).unwrap())
            .unwrap();
    assert_eq!(browser[0]["plugin"], "page-creator");
}

#[tokio::test]
async fn test_production_build_deletes_stale_html() {
    let dir = TempDir::new().unwrap();
    let public = dir.path().join("public");
    fs::create_dir_all(public.join("static")).unwrap();
    fs::write(public.join("index.html"), "<html>").unwrap();
    fs::write(public.join("static/logo.html"), "<svg>").unwrap();

    let mut config = config(Vec::new());
    config.site.production = true;
    let result = Orchestrator::new(config, dir.path(), HandlerRegistry::new())
        .run()
        .await
        .unwrap();

    assert_eq!(result.phases[3].status, PhaseStatus::Succeeded);
    assert!(!public.join("index.html").exists());
    assert!(public.join("static/logo.html").exists());
}
