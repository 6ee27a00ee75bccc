//! Filesystem work around the build output: stale artifact cleanup and
//! runtime template copying.

use ignore::WalkBuilder;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{BuildError, Result};

/// Subdirectory of the public directory that is never cleaned.
const PRESERVED_DIR: &str = "static";

/// Extensions of artifacts a production build regenerates.
const STALE_EXTENSIONS: &[&str] = &["html", "css"];

fn walker(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    // Output and template trees are copied verbatim, ignore files included
    builder.standard_filters(false).follow_links(false);
    builder
}

fn walk_error(root: &Path, err: ignore::Error) -> BuildError {
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed"));
    BuildError::io(root, source)
}

/// Delete generated HTML and CSS from the public directory.
///
/// Files under `static/` are kept. A missing public directory is a no-op.
/// Returns the number of deleted files.
pub fn delete_stale_artifacts(public_dir: &Path) -> Result<usize> {
    if !public_dir.exists() {
        tracing::debug!("No public directory at {:?}, nothing to delete", public_dir);
        return Ok(0);
    }

    let preserved = public_dir.join(PRESERVED_DIR);
    let mut builder = walker(public_dir);
    builder.filter_entry(move |entry| entry.path() != preserved);

    let mut deleted = 0;
    for entry in builder.build() {
        let entry = entry.map_err(|e| walk_error(public_dir, e))?;
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let stale = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| STALE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);
        if stale {
            fs::remove_file(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;
            deleted += 1;
        }
    }

    tracing::debug!("Deleted {} stale artifacts from {:?}", deleted, public_dir);
    Ok(deleted)
}

/// Recursively copy `src` into `dest`, overwriting existing files.
///
/// Returns the number of copied files.
pub fn copy_dir(src: &Path, dest: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(BuildError::io(
            src,
            io::Error::new(io::ErrorKind::NotFound, "runtime directory not found"),
        ));
    }

    let mut copied = 0;
    for entry in walker(src).build() {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);

        match entry.file_type() {
            Some(ft) if ft.is_dir() => {
                fs::create_dir_all(&target).map_err(|e| BuildError::io(&target, e))?;
            }
            Some(ft) if ft.is_file() => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
                }
                fs::copy(entry.path(), &target).map_err(|e| BuildError::io(&target, e))?;
                copied += 1;
            }
            _ => {}
        }
    }

    tracing::debug!("Copied {} runtime files into {:?}", copied, dest);
    Ok(copied)
}
