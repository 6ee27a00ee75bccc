//! Pages from component files in a directory.
//!
//! Every file under the pages directory whose extension is resolvable
//! becomes a page: `index.js` maps to `/`, `blog/index.js` to `/blog/` and
//! `about.js` to `/about/`. Pages are created statefully, so they survive
//! the stale-page sweep; the plugin remembers the paths it created and
//! removes them once their component file is gone, whoever rewrote them
//! since.

use ignore::WalkBuilder;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::HandlerError;
use crate::hooks::{HandlerRegistry, Hook, HookContext};
use crate::orchestrator::DEFAULT_EXTENSIONS;
use crate::pages::PageInput;

pub const NAME: &str = "page-creator";

const DEFAULT_PAGES_DIR: &str = "src/pages";

/// File name fragments that mark tests and type declarations.
const IGNORED_MARKERS: &[&str] = &[".test.", ".spec."];
const DECLARATION_SUFFIX: &str = ".d.ts";

pub fn register(handlers: &mut HandlerRegistry) {
    handlers.register(NAME, Hook::CreatePagesStatefully, create_pages);
}

async fn create_pages(ctx: HookContext) -> Result<Value, HandlerError> {
    let dir = ctx
        .options()
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PAGES_DIR);
    let pages_dir = ctx.root().join(dir);
    let extensions = resolvable_extensions(&ctx.args);

    let files = find_page_files(&pages_dir, &extensions)?;
    let current: Vec<(String, &PathBuf)> = files
        .iter()
        .filter_map(|file| page_path(&pages_dir, file).map(|path| (path, file)))
        .collect();
    let current_paths: BTreeSet<&str> = current.iter().map(|(path, _)| path.as_str()).collect();

    // Paths from earlier runs stay ours even after another plugin rewrote them
    let mut previous: BTreeSet<String> = ctx
        .actions
        .plugin_state()
        .await
        .and_then(|state| serde_json::from_value(state).ok())
        .unwrap_or_default();
    let owner = ctx.actions.plugin().to_string();
    let vanished: Vec<String> = {
        let registry = ctx.actions.store().pages().await;
        previous.extend(
            registry
                .values()
                .filter(|p| p.owner == owner)
                .map(|p| p.path.clone()),
        );
        previous
            .into_iter()
            .filter(|path| !current_paths.contains(path.as_str()))
            .filter(|path| registry.get(path).is_some())
            .collect()
    };
    for path in &vanished {
        ctx.actions.delete_page(path).await;
    }

    for (path, file) in &current {
        let input = PageInput::new(path.clone(), file.to_string_lossy());
        ctx.actions.create_page(input).await?;
    }
    ctx.actions.set_plugin_state(json!(current_paths)).await;

    tracing::debug!(
        "Created {} pages from {:?}, removed {}",
        current.len(),
        pages_dir,
        vanished.len()
    );
    Ok(json!({ "pages": current.len(), "removed": vanished.len() }))
}

fn resolvable_extensions(args: &Value) -> Vec<String> {
    match args.get("extensions").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
    }
}

/// Names starting with `_` or `.` are private, directories included.
fn is_private(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('_') || name.starts_with('.')
}

fn is_page_file(name: &str, extensions: &[String]) -> bool {
    if name.ends_with(DECLARATION_SUFFIX) || IGNORED_MARKERS.iter().any(|m| name.contains(m)) {
        return false;
    }
    let Some(ext) = Path::new(name).extension() else {
        return false;
    };
    let ext = format!(".{}", ext.to_string_lossy());
    extensions.iter().any(|e| *e == ext)
}

/// Page component files under `dir`, sorted. A missing directory has none.
pub fn find_page_files(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, HandlerError> {
    if !dir.is_dir() {
        tracing::debug!("Pages directory {:?} does not exist", dir);
        return Ok(Vec::new());
    }

    let mut builder = WalkBuilder::new(dir);
    builder
        .standard_filters(false)
        .filter_entry(|entry| entry.depth() == 0 || !is_private(entry.file_name()));

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|e| HandlerError::new(e.to_string()))?;
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if is_page_file(&entry.file_name().to_string_lossy(), extensions) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// URL path for a component file; `None` when the file is outside `dir`.
pub fn page_path(dir: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(dir).ok()?;
    let mut segments: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();

    let stem = relative.file_stem()?.to_string_lossy().to_string();
    if stem != "index" {
        segments.push(stem);
    }

    if segments.is_empty() {
        Some("/".to_string())
    } else {
        Some(format!("/{}/", segments.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Actions;
    use crate::config::PluginDescriptor;
    use crate::store::SiteStore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn defaults() -> Vec<String> {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export default () => null").unwrap();
    }

    fn context(root: &Path, store: &SiteStore) -> HookContext {
        HookContext {
            hook: Hook::CreatePagesStatefully,
            plugin: Arc::new(PluginDescriptor::new(NAME, "1.0.0")),
            args: json!({ "extensions": [".js", ".tsx"] }),
            actions: Actions::queued(
                store.clone(),
                crate::actions::CascadeQueue::new().sender(),
                NAME,
                true,
            ),
            root: root.to_path_buf(),
        }
    }

    #[test]
    fn test_page_path() {
        let dir = Path::new("/site/src/pages");
        assert_eq!(page_path(dir, &dir.join("index.js")).unwrap(), "/");
        assert_eq!(page_path(dir, &dir.join("about.js")).unwrap(), "/about/");
        assert_eq!(page_path(dir, &dir.join("blog/index.jsx")).unwrap(), "/blog/");
        assert_eq!(page_path(dir, &dir.join("a/b.js")).unwrap(), "/a/b/");
        assert!(page_path(dir, Path::new("/elsewhere/x.js")).is_none());
    }

    #[test]
    fn test_find_page_files_skips_private_and_tests() {
        let dir = TempDir::new().unwrap();
        let pages = dir.path().join("pages");
        touch(&pages.join("index.js"));
        touch(&pages.join("about.jsx"));
        touch(&pages.join("_layout.js"));
        touch(&pages.join(".draft.js"));
        touch(&pages.join("__tests__/index.js"));
        touch(&pages.join("_private/secret.js"));
        touch(&pages.join("about.test.js"));
        touch(&pages.join("about.spec.js"));
        touch(&pages.join("types.d.ts"));
        touch(&pages.join("notes.md"));
        touch(&pages.join("blog/post.js"));

        let files = find_page_files(&pages, &defaults()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(&pages).unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["about.jsx", "blog/post.js", "index.js"]);
    }

    #[test]
    fn test_extension_must_match_exactly() {
        let js = vec![".js".to_string()];
        assert!(is_page_file("a.js", &js));
        assert!(!is_page_file("a.mjs", &js));
        assert!(!is_page_file("Makefile", &js));
    }

    #[test]
    fn test_find_page_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(find_page_files(&dir.path().join("nope"), &defaults())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_creates_stateful_pages_and_removes_vanished() {
        let dir = TempDir::new().unwrap();
        let pages = dir.path().join("src/pages");
        touch(&pages.join("index.js"));
        touch(&pages.join("gone.tsx"));
        touch(&pages.join("ignored.jsx"));

        let store = SiteStore::new();
        create_pages(context(dir.path(), &store)).await.unwrap();
        {
            let registry = store.pages().await;
            assert_eq!(registry.len(), 2);
            let index = registry.get("/").unwrap();
            assert!(index.stateful);
            assert_eq!(index.owner, NAME);
            assert!(registry.get("/gone/").is_some());
        }

        fs::remove_file(pages.join("gone.tsx")).unwrap();
        let value = create_pages(context(dir.path(), &store)).await.unwrap();

        assert_eq!(value["removed"], 1);
        assert!(store.pages().await.get("/gone/").is_none());
        assert_eq!(store.pages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_removes_vanished_page_rewritten_by_another_plugin() {
        let dir = TempDir::new().unwrap();
        let pages = dir.path().join("src/pages");
        touch(&pages.join("index.js"));
        touch(&pages.join("gone.js"));

        let store = SiteStore::new();
        create_pages(context(dir.path(), &store)).await.unwrap();

        // An onCreatePage observer rewrites the page with extra context
        let i18n = Actions::queued(
            store.clone(),
            crate::actions::CascadeQueue::new().sender(),
            "i18n",
            true,
        );
        let component = pages.join("gone.js").to_string_lossy().to_string();
        i18n.delete_page("/gone/").await;
        i18n.create_page(PageInput::new("/gone/", component).with_context("locale", json!("de")))
            .await
            .unwrap();
        assert_eq!(store.pages().await.get("/gone/").unwrap().owner, "i18n");

        // Next run starts from the persisted state
        let next = SiteStore::new();
        next.restore(store.snapshot().await).await;
        next.pages_mut().await.begin_generation();

        fs::remove_file(pages.join("gone.js")).unwrap();
        let value = create_pages(context(dir.path(), &next)).await.unwrap();
        next.pages_mut().await.sweep_untouched();

        assert_eq!(value["removed"], 1);
        let remaining: Vec<String> = next.pages().await.values().map(|p| p.path.clone()).collect();
        assert_eq!(remaining, vec!["/"]);
    }

    #[tokio::test]
    async fn test_records_created_paths() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("src/pages/about.js"));

        let store = SiteStore::new();
        create_pages(context(dir.path(), &store)).await.unwrap();

        assert_eq!(store.plugin_state(NAME).await, Some(json!(["/about/"])));
    }
}
